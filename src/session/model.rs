//! Session record and related request types
//!
//! These mirror the JSON records exchanged with the session backend.
//! Field names are snake_case on the wire.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Pending,
    Active,
    Ended,
    Cancelled,
    Failed,
}

impl SessionStatus {
    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Ended | SessionStatus::Cancelled | SessionStatus::Failed
        )
    }

    /// Lowercase name, used in human-readable messages
    pub fn as_lower(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Pending => write!(f, "PENDING"),
            SessionStatus::Active => write!(f, "ACTIVE"),
            SessionStatus::Ended => write!(f, "ENDED"),
            SessionStatus::Cancelled => write!(f, "CANCELLED"),
            SessionStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Session record governing one remote-desktop connection attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque session id
    pub id: String,
    pub host_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub host_name: String,
    pub client_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub client_name: String,
    pub status: SessionStatus,
    /// Credential required by the host-side transport endpoint
    #[serde(default, deserialize_with = "null_as_empty")]
    pub session_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webrtc_offer: Option<String>,
    /// Only populated once the host accepted the offer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webrtc_answer: Option<String>,
    #[serde(deserialize_with = "timestamp::required")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "timestamp::required")]
    pub expires_at: DateTime<Utc>,
    #[serde(
        default,
        deserialize_with = "timestamp::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        deserialize_with = "timestamp::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<String>,
}

impl Session {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Answer payload, treating an empty string as absent
    pub fn answer(&self) -> Option<&str> {
        self.webrtc_answer
            .as_deref()
            .filter(|sdp| !sdp.trim().is_empty())
    }

    /// A session without a token cannot authorize a side-channel connection
    pub fn can_authorize_side_channel(&self) -> bool {
        !self.session_token.is_empty()
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Backend timestamps
///
/// The backend writes local date-times without an offset
/// (`2025-01-01T09:00:00.123456`); those are taken as UTC. RFC 3339 values
/// are accepted as well.
mod timestamp {
    use super::*;
    use serde::de::Error;

    pub(super) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .ok()
            .or_else(|| raw.parse::<NaiveDateTime>().ok().map(|t| t.and_utc()))
    }

    pub fn required<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp: {}", raw)))
    }

    pub fn optional<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {}", raw))),
            None => Ok(None),
        }
    }
}

/// Target host address, owned by the external host directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDescriptor {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub ip_address: String,
    pub port: u16,
}

impl HostDescriptor {
    pub fn new(name: impl Into<String>, ip_address: impl Into<String>, port: u16) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            ip_address: ip_address.into(),
            port,
        }
    }
}

/// Body of the create call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub host_id: String,
    pub client_id: String,
    pub program_id: String,
}

/// Body of the start call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub webrtc_offer: String,
}

/// Body of the end call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndSessionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webrtc_answer: Option<String>,
}

impl EndSessionRequest {
    pub fn with_reason(reason: Option<&str>) -> Self {
        Self {
            reason: reason.map(|r| r.to_string()),
            webrtc_answer: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION_JSON: &str = r#"{
        "id": "S1",
        "host_id": "h-1",
        "host_name": "workstation",
        "client_id": "c-1",
        "client_name": "laptop",
        "status": "FAILED",
        "session_token": "tok",
        "expires_at": "2025-01-01T10:00:00Z",
        "created_at": "2025-01-01T09:00:00Z",
        "end_reason": "host unreachable"
    }"#;

    #[test]
    fn test_deserialize_session() {
        let session: Session = serde_json::from_str(SESSION_JSON).unwrap();
        assert_eq!(session.id, "S1");
        assert_eq!(session.status, SessionStatus::Failed);
        assert!(session.is_terminal());
        assert!(session.webrtc_answer.is_none());
        assert!(session.started_at.is_none());
        assert_eq!(session.end_reason.as_deref(), Some("host unreachable"));
    }

    #[test]
    fn test_deserialize_local_timestamps() {
        let json = r#"{
            "id": "S1",
            "host_id": "h-1",
            "host_name": null,
            "client_id": "c-1",
            "client_name": "laptop",
            "status": "ACTIVE",
            "session_token": null,
            "program_id": "p-1",
            "webrtc_offer": null,
            "webrtc_answer": "v=0",
            "expires_at": "2025-01-01T10:00:00",
            "created_at": "2025-01-01T09:00:00.123456",
            "started_at": "2025-01-01T09:00:05.5",
            "ended_at": null,
            "end_reason": null
        }"#;

        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.created_at.to_rfc3339(), "2025-01-01T09:00:00.123456+00:00");
        assert_eq!(session.expires_at.to_rfc3339(), "2025-01-01T10:00:00+00:00");
        assert!(session.started_at.is_some());
        assert!(session.ended_at.is_none());
        assert!(session.host_name.is_empty());
        assert!(!session.can_authorize_side_channel());
        assert_eq!(session.answer(), Some("v=0"));
    }

    #[test]
    fn test_offset_timestamps_are_normalized() {
        let parsed = timestamp::parse("2025-01-01T11:00:00+02:00").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2025-01-01T09:00:00+00:00");
        assert!(timestamp::parse("yesterday").is_none());

        let json = SESSION_JSON.replace("2025-01-01T09:00:00Z", "not a date");
        assert!(serde_json::from_str::<Session>(&json).is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!SessionStatus::Pending.is_terminal());
        assert!(!SessionStatus::Active.is_terminal());
        assert!(SessionStatus::Ended.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
    }

    #[test]
    fn test_empty_answer_is_absent() {
        let mut session: Session = serde_json::from_str(SESSION_JSON).unwrap();
        session.webrtc_answer = Some("   ".to_string());
        assert!(session.answer().is_none());

        session.webrtc_answer = Some("v=0\r\n".to_string());
        assert_eq!(session.answer(), Some("v=0\r\n"));
    }

    #[test]
    fn test_end_request_omits_empty_fields() {
        let json = serde_json::to_string(&EndSessionRequest::default()).unwrap();
        assert_eq!(json, "{}");

        let json = serde_json::to_string(&EndSessionRequest::with_reason(Some("Ended by user")))
            .unwrap();
        assert_eq!(json, r#"{"reason":"Ended by user"}"#);
    }
}
