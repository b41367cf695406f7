//! Event records produced by the stream decoder.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a decoded stream event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Standard output chunk.
    Stdout,
    /// Standard error chunk.
    Stderr,
    /// Terminal exit status (JSON payload).
    Exit,
    /// Events without an `event:` line. Never an application event.
    Message,
    /// Any kind this client does not know about.
    Other(String),
}

impl EventKind {
    /// Parse the value of an `event:` line.
    pub fn parse(name: &str) -> Self {
        match name {
            "stdout" => Self::Stdout,
            "stderr" => Self::Stderr,
            "exit" => Self::Exit,
            "" | "message" => Self::Message,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire name of this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Exit => "exit",
            Self::Message => "message",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One complete event: kind plus joined `data:` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub kind: EventKind,
    pub payload: String,
}

impl EventRecord {
    pub fn new(kind: EventKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }
}

/// Exit status reported by the backend, both in `exit` events and `wait` responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitStatus {
    /// Process exit code.
    pub exit_code: i32,
    /// Backend-side error, if the process could not run to completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExitStatus {
    /// Check if the process succeeded (exit code 0, no error).
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.error.is_none()
    }
}
