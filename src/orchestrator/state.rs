//! Lifecycle states of a session run

use serde::{Deserialize, Serialize};

/// Lifecycle state
///
/// ```text
/// Idle -> Loading -> {Resuming, Starting} -> Connecting -> Connected -> Ending -> Terminated
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Idle,
    /// Fetching the session record
    Loading,
    /// Reusing the answer of an already active session
    Resuming,
    /// Creating and submitting a local offer, then polling for the answer
    Starting,
    /// Waiting for the peer transport to report `connected`
    Connecting,
    Connected,
    /// Closing transports and ending the session record
    Ending,
    Terminated { reason: Option<String> },
}

impl LifecycleState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, LifecycleState::Terminated { .. })
    }

    /// Default status line for the state
    pub fn status_message(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "Idle",
            LifecycleState::Loading => "Loading session...",
            LifecycleState::Resuming => "Connecting to video...",
            LifecycleState::Starting => "Starting session...",
            LifecycleState::Connecting => "Connecting to host...",
            LifecycleState::Connected => "Connected",
            LifecycleState::Ending => "Ending session...",
            LifecycleState::Terminated { .. } => "Session ended",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Idle => write!(f, "idle"),
            LifecycleState::Loading => write!(f, "loading"),
            LifecycleState::Resuming => write!(f, "resuming"),
            LifecycleState::Starting => write!(f, "starting"),
            LifecycleState::Connecting => write!(f, "connecting"),
            LifecycleState::Connected => write!(f, "connected"),
            LifecycleState::Ending => write!(f, "ending"),
            LifecycleState::Terminated { reason: Some(r) } => write!(f, "terminated ({})", r),
            LifecycleState::Terminated { reason: None } => write!(f, "terminated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_is_tagged() {
        let json = serde_json::to_string(&LifecycleState::Connecting).unwrap();
        assert_eq!(json, r#"{"state":"connecting"}"#);

        let json = serde_json::to_string(&LifecycleState::Terminated {
            reason: Some("Ended by user".to_string()),
        })
        .unwrap();
        assert_eq!(json, r#"{"state":"terminated","reason":"Ended by user"}"#);
    }

    #[test]
    fn test_display() {
        assert_eq!(LifecycleState::Idle.to_string(), "idle");
        assert_eq!(
            LifecycleState::Terminated { reason: None }.to_string(),
            "terminated"
        );
    }
}
