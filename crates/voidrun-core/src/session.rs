//! Persistent session identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Backend-assigned identifier of a persistent session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Whether a connection addresses a durable backend session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMode {
    /// No identity: one connection for the session's whole life, not resumable.
    Ephemeral,
    /// Durable session; any number of connections may come and go.
    Persistent(SessionId),
}

impl SessionMode {
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::Ephemeral => None,
            Self::Persistent(id) => Some(id),
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Persistent(_))
    }
}

impl From<Option<SessionId>> for SessionMode {
    fn from(id: Option<SessionId>) -> Self {
        match id {
            Some(id) => Self::Persistent(id),
            None => Self::Ephemeral,
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ephemeral => write!(f, "ephemeral"),
            Self::Persistent(id) => write!(f, "persistent({id})"),
        }
    }
}

/// Snapshot of a persistent session as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    #[serde(rename = "id", alias = "sessionId")]
    pub session_id: SessionId,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    /// Connections currently attached.
    #[serde(rename = "clients", alias = "clientCount", default)]
    pub client_count: u32,
    #[serde(default = "default_alive")]
    pub alive: bool,
}

fn default_alive() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_from_list_entry() {
        let json = r#"{"id":"s-1","createdAt":"2026-01-02T03:04:05Z","clients":2,"alive":true}"#;
        let desc: SessionDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.session_id.as_str(), "s-1");
        assert_eq!(desc.client_count, 2);
        assert!(desc.alive);
    }

    #[test]
    fn test_descriptor_from_create_response() {
        let json = r#"{"sessionId":"s-2","createdAt":"2026-01-02T03:04:05Z"}"#;
        let desc: SessionDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.session_id, SessionId::from("s-2"));
        assert_eq!(desc.client_count, 0);
        assert!(desc.alive);
    }

    #[test]
    fn test_mode_from_option() {
        assert_eq!(SessionMode::from(None), SessionMode::Ephemeral);
        let mode = SessionMode::from(Some(SessionId::from("abc")));
        assert!(mode.is_persistent());
        assert_eq!(mode.session_id().map(SessionId::as_str), Some("abc"));
        assert_eq!(mode.to_string(), "persistent(abc)");
    }
}
