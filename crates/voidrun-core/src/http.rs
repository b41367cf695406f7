//! HTTP client for the backend's REST and event-stream endpoints.
//!
//! Every non-2xx response and every network failure becomes a
//! [`SdkError::BackendRequest`]; nothing here retries.

use crate::config::ClientConfig;
use crate::dispatch::ByteStream;
use crate::error::{Result, SdkError};
use futures::StreamExt;
use reqwest::{Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use std::sync::Arc;

const API_KEY_HEADER: &str = "X-API-Key";

/// Shared REST client. Cheap to clone.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
}

impl ApiClient {
    /// Create a client. The configuration is validated first.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(SdkError::network)?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.base(), path);
        self.http
            .request(method, url)
            .header(API_KEY_HEADER, &self.config.api_key)
    }

    /// GET and decode a JSON response.
    pub async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        tracing::debug!(path = %path, "GET");
        let request = self
            .request(Method::GET, path)
            .timeout(self.config.request_timeout);
        decode(send(request).await?).await
    }

    /// POST a JSON body and decode a JSON response.
    pub async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        tracing::debug!(path = %path, "POST");
        let request = self
            .request(Method::POST, path)
            .timeout(self.config.request_timeout)
            .json(body);
        decode(send(request).await?).await
    }

    /// POST without a client-side timeout, for calls that block on the backend
    /// (e.g. waiting for a process to exit).
    pub async fn post_json_untimed<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        tracing::debug!(path = %path, "POST (untimed)");
        let request = self.request(Method::POST, path).json(body);
        decode(send(request).await?).await
    }

    /// POST a JSON body, discarding the response body.
    pub async fn post_unit<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        tracing::debug!(path = %path, "POST");
        let request = self
            .request(Method::POST, path)
            .timeout(self.config.request_timeout)
            .json(body);
        send(request).await?;
        Ok(())
    }

    /// DELETE a resource.
    pub async fn delete(&self, path: &str) -> Result<()> {
        tracing::debug!(path = %path, "DELETE");
        let request = self
            .request(Method::DELETE, path)
            .timeout(self.config.request_timeout);
        send(request).await?;
        Ok(())
    }

    /// POST a JSON body and return the response body as a byte-chunk stream.
    pub async fn post_event_stream<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ByteStream> {
        tracing::debug!(path = %path, "POST (event stream)");
        let request = self
            .request(Method::POST, path)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(body);
        let response = send(request).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| SdkError::TransportFailure(e.to_string())))
            .boxed();
        Ok(stream)
    }
}

async fn send(request: RequestBuilder) -> Result<Response> {
    let response = request.send().await.map_err(|e| {
        tracing::warn!(error = %e, "Request failed before a response arrived");
        SdkError::network(e)
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.ok();
    let message = body.as_deref().and_then(error_message);
    tracing::debug!(status = %status, message = ?message, "Backend returned error status");
    Err(SdkError::request_failed(status, message))
}

async fn decode<R: DeserializeOwned>(response: Response) -> Result<R> {
    let bytes = response.bytes().await.map_err(SdkError::network)?;
    tracing::trace!(len = bytes.len(), "Response body received");
    serde_json::from_slice(&bytes).map_err(SdkError::from)
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Extract the backend's message from an error body: the JSON `error` or
/// `message` field, else the trimmed text.
fn error_message(body: &str) -> Option<String> {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(msg) = parsed.error.or(parsed.message) {
            return Some(msg);
        }
    }
    let trimmed = body.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// `{ status, message, data }` envelope used by the session and watch endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub data: Option<T>,
}

/// Treat a JSON `null` list the same as an empty one.
pub(crate) fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
