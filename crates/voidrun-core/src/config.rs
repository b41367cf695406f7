//! Client configuration.
//!
//! Configuration is loaded from environment variables with sensible defaults,
//! and can be adjusted with the `with_*` setters.

use std::time::Duration;

/// Default API endpoint.
pub const DEFAULT_API_URL: &str = "https://vr-api.dcdeploy.cloud/api";

/// Default timeout applied to non-streaming REST calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default delay after a PTY connection opens, so the initial prompt arrives
/// before `connect` returns.
pub const DEFAULT_PTY_SETTLE: Duration = Duration::from_millis(500);

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("API key is required")]
    MissingApiKey,

    #[error("base URL is required")]
    MissingBaseUrl,

    #[error("invalid base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

/// Configuration for a VoidRun client.
#[derive(Clone)]
pub struct ClientConfig {
    /// API key sent as `X-API-Key` (and `apiKey` on WebSocket URLs).
    pub api_key: String,

    /// HTTP(S) base URL of the API, e.g. `https://host/api`.
    pub base_url: String,

    /// Timeout for non-streaming requests (default: 30s).
    pub request_timeout: Duration,

    /// Settle delay after opening a PTY connection (default: 500ms).
    pub pty_settle: Duration,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .field("pty_settle", &self.pty_settle)
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_API_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            pty_settle: DEFAULT_PTY_SETTLE,
        }
    }
}

impl ClientConfig {
    /// Create a config with the given key and base URL and default timings.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `VR_API_KEY` | (required) |
    /// | `VR_API_URL` | `https://vr-api.dcdeploy.cloud/api` |
    /// | `VR_REQUEST_TIMEOUT_SECS` | `30` |
    /// | `VR_PTY_SETTLE_MS` | `500` |
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            api_key: std::env::var("VR_API_KEY").unwrap_or(default.api_key),
            base_url: std::env::var("VR_API_URL")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(default.base_url),
            request_timeout: std::env::var("VR_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.request_timeout),
            pty_settle: std::env::var("VR_PTY_SETTLE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default.pty_settle),
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = key.into();
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the timeout for non-streaming requests.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the PTY settle delay.
    pub fn with_pty_settle(mut self, settle: Duration) -> Self {
        self.pty_settle = settle;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if self.base_url.is_empty() {
            return Err(ConfigError::MissingBaseUrl);
        }
        let url = url::Url::parse(&self.base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.base_url.clone(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }
        Ok(())
    }

    /// Base URL without a trailing slash.
    pub(crate) fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}
