//! Client entry point.

use crate::config::ClientConfig;
use crate::error::Result;
use crate::http::ApiClient;
use crate::sandbox::{Sandbox, SandboxId};
use crate::transport::{Connector, WsConnector};
use std::sync::Arc;

/// Entry point: holds the REST client and the session connector shared by
/// every [`Sandbox`] handle it hands out.
#[derive(Clone)]
pub struct Client {
    api: ApiClient,
    connector: Arc<dyn Connector>,
}

impl Client {
    /// Create a client using WebSockets for persistent sessions.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let connector = Arc::new(WsConnector::new(&config));
        Self::with_connector(config, connector)
    }

    /// Create a client from `VR_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env())
    }

    /// Create a client with a custom session transport.
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let api = ApiClient::new(config)?;
        tracing::debug!(base_url = %api.config().base(), "Client ready");
        Ok(Self { api, connector })
    }

    pub fn config(&self) -> &ClientConfig {
        self.api.config()
    }

    /// Bind a handle to an existing sandbox. Makes no request.
    pub fn sandbox(&self, id: impl Into<SandboxId>) -> Sandbox {
        Sandbox::new(id.into(), self.api.clone(), self.connector.clone())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", self.api.config())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SdkError;

    #[test]
    fn test_new_requires_api_key() {
        let result = Client::new(ClientConfig::default());
        assert!(matches!(result, Err(SdkError::Config(_))));
    }

    #[test]
    fn test_sandbox_binds_id() {
        let client = Client::new(ClientConfig::new("key", "https://api.example.com/api")).unwrap();
        let sandbox = client.sandbox("sb-7");
        assert_eq!(sandbox.id().as_str(), "sb-7");
        assert!(!format!("{client:?}").contains("\"key\""));
    }
}
