use serde::{Deserialize, Serialize};

use crate::session::poll::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_POLL_MAX_ATTEMPTS};

// Re-export WebRtcConfig from webrtc module
pub use crate::webrtc::WebRtcConfig;

/// Main client configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Session backend settings
    pub api: ApiConfig,
    /// Answer polling settings
    pub signaling: SignalingConfig,
    /// Peer connection settings
    pub webrtc: WebRtcConfig,
    /// Input side channel settings
    pub side_channel: SideChannelConfig,
    /// Side channel reconnection settings
    pub reconnect: ReconnectConfig,
}

/// Session backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API root, e.g. `http://localhost:8080/api/v1`
    pub base_url: String,
    /// Bearer token issued by the auth service
    pub access_token: Option<String>,
    /// Per-request timeout
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/v1".to_string(),
            access_token: None,
            request_timeout_secs: 10,
        }
    }
}

/// Answer polling configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub poll_interval_ms: u64,
    pub poll_max_attempts: u32,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            poll_max_attempts: DEFAULT_POLL_MAX_ATTEMPTS,
        }
    }
}

/// Side channel backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideChannelBackend {
    /// Data channel on the peer connection
    #[default]
    Peer,
    /// WebSocket to the host's input endpoint
    Socket,
}

impl SideChannelBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            SideChannelBackend::Peer => "peer",
            SideChannelBackend::Socket => "socket",
        }
    }
}

impl std::str::FromStr for SideChannelBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "peer" | "datachannel" => Ok(SideChannelBackend::Peer),
            "socket" | "websocket" | "ws" => Ok(SideChannelBackend::Socket),
            _ => Err(format!("unknown side channel backend: {}", s)),
        }
    }
}

impl std::fmt::Display for SideChannelBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Input side channel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SideChannelConfig {
    pub backend: SideChannelBackend,
    /// Path of the host's socket endpoint
    pub socket_path: String,
    /// Native video width, used for pixel coordinates on the socket backend
    pub video_width: u32,
    pub video_height: u32,
}

impl Default for SideChannelConfig {
    fn default() -> Self {
        Self {
            backend: SideChannelBackend::Peer,
            socket_path: "/ws".to_string(),
            video_width: 1920,
            video_height: 1080,
        }
    }
}

/// Reconnection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}
