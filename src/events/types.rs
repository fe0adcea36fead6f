//! Session event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

use crate::orchestrator::LifecycleState;
use crate::session::SessionStatus;
use crate::webrtc::ConnectionState;

/// Session event enumeration
///
/// All events are tagged with their event name for serialization:
/// ```json
/// {
///   "event": "session.state_changed",
///   "data": { "session_id": "S1", "state": { "state": "connecting" } }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    // ============================================================================
    // Session Lifecycle Events
    // ============================================================================
    /// Orchestrator moved to a new lifecycle state
    #[serde(rename = "session.state_changed")]
    SessionStateChanged {
        session_id: Option<String>,
        state: LifecycleState,
    },

    /// A session record was fetched or returned by the backend
    #[serde(rename = "session.updated")]
    SessionUpdated {
        session_id: String,
        status: SessionStatus,
        end_reason: Option<String>,
    },

    /// Human-readable status line changed
    #[serde(rename = "session.status_message")]
    StatusMessage { message: String },

    /// A fatal error stopped the current run
    #[serde(rename = "session.error")]
    SessionError {
        session_id: Option<String>,
        message: String,
    },

    // ============================================================================
    // Transport Events
    // ============================================================================
    /// Peer transport coarse state changed
    #[serde(rename = "transport.state_changed")]
    TransportStateChanged {
        session_id: String,
        state: ConnectionState,
    },

    /// Inbound media arrived (or was lost)
    #[serde(rename = "media.connected")]
    MediaConnected {
        session_id: String,
        connected: bool,
        /// Track kind that triggered the change: "video" or "audio"
        kind: String,
    },

    /// Input side channel opened or closed
    #[serde(rename = "input.channel_changed")]
    InputChannelChanged {
        /// Backend: "peer" or "socket"
        backend: String,
        connected: bool,
    },

    // ============================================================================
    // Reconnection Events
    // ============================================================================
    /// A reconnect attempt is scheduled
    #[serde(rename = "reconnect.scheduled")]
    ReconnectScheduled {
        backend: String,
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
    },

    /// Reconnect budget exhausted, manual retry required
    #[serde(rename = "reconnect.exhausted")]
    ReconnectExhausted { backend: String, max_attempts: u32 },

    // ============================================================================
    // Host Events
    // ============================================================================
    /// Status text sent by the host over the socket side channel
    #[serde(rename = "host.status")]
    HostStatus { message: String },
}

impl SystemEvent {
    /// Get the event name (for filtering and logging)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SessionStateChanged { .. } => "session.state_changed",
            Self::SessionUpdated { .. } => "session.updated",
            Self::StatusMessage { .. } => "session.status_message",
            Self::SessionError { .. } => "session.error",
            Self::TransportStateChanged { .. } => "transport.state_changed",
            Self::MediaConnected { .. } => "media.connected",
            Self::InputChannelChanged { .. } => "input.channel_changed",
            Self::ReconnectScheduled { .. } => "reconnect.scheduled",
            Self::ReconnectExhausted { .. } => "reconnect.exhausted",
            Self::HostStatus { .. } => "host.status",
        }
    }

    /// Check if event matches a topic pattern
    ///
    /// Supports wildcards:
    /// - `*` matches all events
    /// - `session.*` matches all session events
    /// - `session.updated` matches exact event
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();

        if topic.ends_with(".*") {
            let prefix = topic.trim_end_matches(".*");
            event_name.starts_with(prefix)
        } else {
            event_name == topic
        }
    }
}
