//! Transport seam for persistent sessions.
//!
//! The session channel only needs a way to open a connection by path, send
//! text, close, and read inbound frames. [`WsConnector`] provides that over
//! WebSockets; tests substitute in-memory connectors.

use crate::config::ClientConfig;
use crate::error::{Result, SdkError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, SplitSink};
use futures::{future, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Inbound frame as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    /// Normalize to text (UTF-8, lossy).
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }
}

/// Inbound half of a connection. Ends when the remote side closes.
pub type FrameStream = BoxStream<'static, Result<Frame>>;

/// Outbound half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// An open connection.
pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    pub frames: FrameStream,
}

/// Opens connections to backend paths such as `/sandboxes/{id}/pty`.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and return once the connection is confirmed open.
    async fn connect(&self, path: &str) -> Result<Connection>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector derived from the client configuration.
#[derive(Clone)]
pub struct WsConnector {
    base_url: String,
    api_key: String,
}

impl WsConnector {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            base_url: config.base().to_string(),
            api_key: config.api_key.clone(),
        }
    }

    /// Full WebSocket URL for a path: `http(s)` becomes `ws(s)` and the API key
    /// is passed as the `apiKey` query parameter.
    pub fn url_for(&self, path: &str) -> Result<url::Url> {
        let ws_base = match self.base_url.strip_prefix("http") {
            Some(rest) => format!("ws{rest}"),
            None => self.base_url.clone(),
        };
        let mut url = url::Url::parse(&format!("{ws_base}{path}"))
            .map_err(|e| SdkError::TransportFailure(format!("invalid session URL: {e}")))?;
        url.query_pairs_mut().append_pair("apiKey", &self.api_key);
        Ok(url)
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, path: &str) -> Result<Connection> {
        let url = self.url_for(path)?;
        tracing::debug!(path = %path, "Opening WebSocket");

        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| SdkError::TransportFailure(format!("websocket connect failed: {e}")))?;
        tracing::info!(path = %path, "WebSocket open");

        let (sink, read) = stream.split();
        let frames = read
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(Frame::Text(text))),
                    Ok(Message::Binary(data)) => Some(Ok(Frame::Binary(Bytes::from(data)))),
                    Ok(_) => None,
                    Err(e) => Some(Err(SdkError::TransportFailure(e.to_string()))),
                })
            })
            .boxed();

        Ok(Connection {
            sink: Box::new(WsSink(sink)),
            frames,
        })
    }
}

struct WsSink(SplitSink<WsStream, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.0
            .send(Message::Text(text))
            .await
            .map_err(|e| SdkError::TransportFailure(format!("websocket send failed: {e}")))
    }

    async fn close(&mut self) -> Result<()> {
        self.0
            .close()
            .await
            .map_err(|e| SdkError::TransportFailure(format!("websocket close failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url_https() {
        let connector = WsConnector::new(&ClientConfig::new("k y", "https://api.example.com/api/"));
        let url = connector.url_for("/sandboxes/abc/pty").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://api.example.com/api/sandboxes/abc/pty?apiKey=k+y"
        );
    }

    #[test]
    fn test_ws_url_http() {
        let connector = WsConnector::new(&ClientConfig::new("key", "http://localhost:8080"));
        let url = connector.url_for("/sandboxes/abc/pty/sessions/s1").unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.path(), "/sandboxes/abc/pty/sessions/s1");
        assert_eq!(url.query(), Some("apiKey=key"));
    }

    #[test]
    fn test_binary_frame_normalized() {
        let frame = Frame::Binary(Bytes::from_static("prompt ✓".as_bytes()));
        assert_eq!(frame.into_text(), "prompt ✓");
        assert_eq!(Frame::Text("t".into()).into_text(), "t");
    }
}
