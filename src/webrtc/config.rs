//! WebRTC configuration

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Default public STUN server
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// WebRTC configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// TURN server configuration
    pub turn_servers: Vec<TurnServer>,
    /// Label of the data channel that carries input frames
    pub input_channel_label: String,
    /// Label of the channel opened only to force data-channel negotiation
    pub bootstrap_channel_label: String,
    /// Request an audio track from the host
    pub receive_audio: bool,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            turn_servers: vec![],
            input_channel_label: "input".to_string(),
            bootstrap_channel_label: "_bootstrap".to_string(),
            receive_audio: true,
        }
    }
}

impl WebRtcConfig {
    /// ICE servers for the peer connection configuration
    pub fn ice_servers(&self) -> Vec<RTCIceServer> {
        let mut servers = Vec::new();

        if !self.stun_servers.is_empty() {
            servers.push(RTCIceServer {
                urls: self.stun_servers.clone(),
                ..Default::default()
            });
        }

        for turn in &self.turn_servers {
            if turn.urls.is_empty() {
                continue;
            }
            servers.push(RTCIceServer {
                urls: turn.urls.clone(),
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            });
        }

        servers
    }
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServer {
    /// TURN server URLs; several allow fallback between UDP and TCP
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

impl TurnServer {
    pub fn new(url: String, username: String, credential: String) -> Self {
        Self {
            urls: vec![url],
            username,
            credential,
        }
    }
}
