//! Error types for voidrun-core.

use crate::config::ConfigError;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for voidrun-core operations.
pub type Result<T> = std::result::Result<T, SdkError>;

/// Errors surfaced by streams, sessions and backend requests.
#[derive(Debug, Error)]
pub enum SdkError {
    /// An `exit` event carried a payload that is not a valid exit status.
    ///
    /// Recovered per event: the stream keeps dispatching.
    #[error("malformed exit payload {payload:?}: {reason}")]
    DecodeAmbiguity {
        /// Raw event payload
        payload: String,
        /// Parser message
        reason: String,
    },

    /// Connection-level failure on a stream or persistent channel.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The channel has no open connection.
    #[error("session channel is not connected")]
    NotConnected,

    /// No prompt match before the automation deadline.
    #[error("command timed out after {}ms. Collected output: {output}", .timeout.as_millis())]
    CommandTimeout {
        /// Deadline that elapsed
        timeout: Duration,
        /// Everything received since the command was sent
        output: String,
    },

    /// Non-2xx response or network failure from a one-shot request.
    #[error("{message}")]
    BackendRequest {
        /// HTTP status, absent when no response was received
        status: Option<u16>,
        /// Formatted failure message
        message: String,
    },

    /// A prompt pattern failed to compile.
    #[error("invalid prompt pattern: {0}")]
    InvalidPrompt(#[from] regex::Error),

    /// No interpreter is known by this name.
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// A one-shot stream was cancelled by its caller.
    #[error("stream aborted")]
    Aborted,

    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SdkError {
    /// Build a request failure from an HTTP status and an optional body message.
    pub(crate) fn request_failed(status: reqwest::StatusCode, body: Option<String>) -> Self {
        let reason = status.canonical_reason().unwrap_or("HTTP Error");
        let message = match body.filter(|b| !b.is_empty()) {
            Some(body) => format!("Request failed ({} {reason}): {body}", status.as_u16()),
            None => format!("Request failed ({} {reason})", status.as_u16()),
        };
        Self::BackendRequest {
            status: Some(status.as_u16()),
            message,
        }
    }

    /// Build a request failure for a request that never got a response.
    pub(crate) fn network(err: impl std::fmt::Display) -> Self {
        Self::BackendRequest {
            status: None,
            message: format!("Network error: {err}"),
        }
    }

    /// HTTP status of a failed backend request, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::BackendRequest { status, .. } => *status,
            _ => None,
        }
    }
}
