use thiserror::Error;

use crate::session::SessionStatus;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("No session id supplied")]
    MissingSessionId,

    #[error("Session {session_id} is already {status}")]
    SessionAlreadyTerminal {
        session_id: String,
        status: SessionStatus,
    },

    #[error("Failed to create offer: {0}")]
    OfferCreationFailed(String),

    #[error("Peer connection not initialized")]
    NoActiveTransport,

    #[error("No WebRTC answer received from host")]
    MissingAnswer,

    #[error("session did not become active in time")]
    PollTimeout { attempts: u32 },

    #[error("session {}{}", .status.as_lower(), reason_suffix(.end_reason))]
    SessionTerminalDuringPoll {
        status: SessionStatus,
        end_reason: Option<String>,
    },

    #[error("Transport failed: {0}")]
    TransportFailed(String),

    #[error("Failed to end session: {0}")]
    EndSessionFailed(String),

    #[error("Session run cancelled")]
    Cancelled,

    #[error("Input channel not available")]
    SideChannelUnavailable,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error [{status}]: {message}")]
    Api { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebRTC error: {0}")]
    WebRtc(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

fn reason_suffix(end_reason: &Option<String>) -> String {
    match end_reason {
        Some(reason) if !reason.is_empty() => format!(": {}", reason),
        _ => String::new(),
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_during_poll_message() {
        let err = AppError::SessionTerminalDuringPoll {
            status: SessionStatus::Failed,
            end_reason: Some("host unreachable".to_string()),
        };
        assert_eq!(err.to_string(), "session failed: host unreachable");

        let err = AppError::SessionTerminalDuringPoll {
            status: SessionStatus::Cancelled,
            end_reason: None,
        };
        assert_eq!(err.to_string(), "session cancelled");
    }
}
