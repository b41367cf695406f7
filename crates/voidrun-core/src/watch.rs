//! Filesystem change notifications.
//!
//! A watch is started over REST, then its events arrive as JSON frames on a
//! session channel. Frames that do not parse are logged and skipped.

use crate::channel::{ChannelCallbacks, ChannelState, ErrorCallback, SessionChannel};
use crate::error::{Result, SdkError};
use crate::http::{ApiClient, Envelope};
use crate::session::SessionId;
use crate::transport::Connector;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Kind of filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeKind {
    Create,
    Write,
    Remove,
    Rename,
    Chmod,
    #[serde(other)]
    Unknown,
}

/// One change reported by the backend watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeEvent {
    #[serde(rename = "type")]
    pub kind: FileChangeKind,
    pub path: String,
}

/// Event callback for a watch.
pub type EventCallback = Box<dyn FnMut(FileChangeEvent) + Send>;

/// Options for [`crate::Sandbox::watch`].
#[derive(Default)]
pub struct WatchOptions {
    pub recursive: bool,
    pub ignore_hidden: bool,
    pub on_event: Option<EventCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl WatchOptions {
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn ignore_hidden(mut self, ignore_hidden: bool) -> Self {
        self.ignore_hidden = ignore_hidden;
        self
    }

    pub fn on_event(mut self, callback: impl FnMut(FileChangeEvent) + Send + 'static) -> Self {
        self.on_event = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl FnMut(&SdkError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartWatchRequest<'a> {
    path: &'a str,
    recursive: bool,
    ignore_hidden: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartWatchResponse {
    session_id: SessionId,
}

/// An active directory watch.
pub struct FileWatcher {
    channel: SessionChannel,
    session_id: SessionId,
    path: String,
}

impl FileWatcher {
    pub(crate) async fn start(
        api: &ApiClient,
        connector: Arc<dyn Connector>,
        sandbox_id: &str,
        path: &str,
        options: WatchOptions,
    ) -> Result<Self> {
        let request = StartWatchRequest {
            path,
            recursive: options.recursive,
            ignore_hidden: options.ignore_hidden,
        };
        let envelope: Envelope<StartWatchResponse> = api
            .post_json(&format!("/sandboxes/{sandbox_id}/files/watch"), &request)
            .await?;
        let started = envelope.data.ok_or_else(|| SdkError::BackendRequest {
            status: None,
            message: "watch response carried no session id".into(),
        })?;
        tracing::debug!(sandbox_id = %sandbox_id, path = %path, session_id = %started.session_id, "Watch session started");
        Self::open(connector, sandbox_id, started.session_id, path, options).await
    }

    async fn open(
        connector: Arc<dyn Connector>,
        sandbox_id: &str,
        session_id: SessionId,
        path: &str,
        options: WatchOptions,
    ) -> Result<Self> {
        let mut on_event = options.on_event;
        let on_data = move |text: &str| match serde_json::from_str::<FileChangeEvent>(text) {
            Ok(event) => {
                tracing::trace!(kind = ?event.kind, path = %event.path, "File change");
                if let Some(callback) = on_event.as_mut() {
                    callback(event);
                }
            }
            Err(e) => tracing::warn!(error = %e, frame = %text, "Failed to parse watch event"),
        };

        let channel = SessionChannel::new(
            connector,
            format!("/sandboxes/{sandbox_id}/files/watch/{session_id}/stream"),
            ChannelCallbacks {
                on_data: Some(Box::new(on_data)),
                on_close: None,
                on_error: options.on_error,
            },
        );
        channel.connect().await?;
        tracing::info!(session_id = %session_id, path = %path, "Watching");

        Ok(Self {
            channel,
            session_id,
            path: path.to_string(),
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Watched path.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// Wait until the backend ends the watch stream.
    pub async fn closed(&self) {
        let mut state = self.channel.watch_state();
        let _ = state.wait_for(|s| *s == ChannelState::Closed).await;
    }

    pub async fn close(&self) {
        self.channel.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::mock_connector;
    use std::sync::Mutex;

    #[test]
    fn test_event_kinds() {
        let event: FileChangeEvent =
            serde_json::from_str(r#"{"type":"write","path":"/app/main.py"}"#).unwrap();
        assert_eq!(event.kind, FileChangeKind::Write);

        let event: FileChangeEvent =
            serde_json::from_str(r#"{"type":"attrib","path":"/x"}"#).unwrap();
        assert_eq!(event.kind, FileChangeKind::Unknown);
    }

    #[test]
    fn test_start_request_shape() {
        let request = StartWatchRequest {
            path: "/app",
            recursive: true,
            ignore_hidden: false,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"path":"/app","recursive":true,"ignoreHidden":false})
        );
    }

    #[tokio::test]
    async fn test_events_parsed_and_garbage_skipped() {
        let (connector, remote) = mock_connector();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let options = WatchOptions::default().on_event(move |event| sink.lock().unwrap().push(event));

        let watcher = FileWatcher::open(connector.clone(), "sb", SessionId::from("w1"), "/app", options)
            .await
            .unwrap();
        assert_eq!(
            *connector.paths.lock().unwrap(),
            vec!["/sandboxes/sb/files/watch/w1/stream"]
        );

        remote.text(r#"{"type":"create","path":"/app/a.txt"}"#);
        remote.text("not json");
        remote.text(r#"{"type":"remove","path":"/app/a.txt"}"#);
        drop(remote);
        watcher.closed().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].kind, FileChangeKind::Create);
        assert_eq!(seen[1].kind, FileChangeKind::Remove);
        assert_eq!(watcher.path(), "/app");
    }
}
