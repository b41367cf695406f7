//! Persistent session channel.
//!
//! Wraps one bidirectional connection (PTY or watch stream). Inbound frames are
//! normalized to text and delivered, in arrival order and one call per frame,
//! to an ordered list of data subscribers. The primary data callback is the
//! first subscriber; extra subscriptions are RAII handles that deregister on
//! drop, so an interceptor can never outlive the code that installed it.
//!
//! Delivery and subscriber mutation share one lock. Subscribers must not call
//! back into [`SessionChannel::subscribe`] from inside a callback.

use crate::error::{Result, SdkError};
use crate::transport::{Connector, FrameSink, FrameStream};
use futures::StreamExt;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Data callback: receives each inbound frame as text.
pub type DataCallback = Box<dyn FnMut(&str) + Send>;
/// Close callback: fired at most once per channel.
pub type CloseCallback = Box<dyn FnOnce() + Send>;
/// Error callback: transport failures.
pub type ErrorCallback = Box<dyn FnMut(&SdkError) + Send>;

/// Lifecycle callbacks supplied when a channel is created.
#[derive(Default)]
pub struct ChannelCallbacks {
    pub on_data: Option<DataCallback>,
    pub on_close: Option<CloseCallback>,
    pub on_error: Option<ErrorCallback>,
}

/// Connection state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Not yet connected.
    Idle,
    /// Connection open.
    Open,
    /// Closed by either side. Terminal.
    Closed,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<(u64, DataCallback)>,
}

struct Shared {
    subscribers: Mutex<Subscribers>,
    on_close: Mutex<Option<CloseCallback>>,
    on_error: Mutex<Option<ErrorCallback>>,
    state: watch::Sender<ChannelState>,
}

impl Shared {
    fn deliver(&self, text: &str) {
        let mut subs = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, callback) in subs.entries.iter_mut() {
            callback(text);
        }
    }

    fn add_subscriber(&self, callback: DataCallback) -> u64 {
        let mut subs = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let id = subs.next_id;
        subs.next_id += 1;
        subs.entries.push((id, callback));
        id
    }

    fn remove_subscriber(&self, id: u64) {
        let mut subs = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subs.entries.retain(|(entry, _)| *entry != id);
    }

    fn report_error(&self, error: &SdkError) {
        if let Ok(mut guard) = self.on_error.lock() {
            if let Some(callback) = guard.as_mut() {
                callback(error);
            }
        }
    }

    /// Move to `Closed`; fire `on_close` if a connection had been opened.
    fn mark_closed(&self) {
        let previous = self.state.send_replace(ChannelState::Closed);
        if previous != ChannelState::Open {
            return;
        }
        let callback = self.on_close.lock().ok().and_then(|mut guard| guard.take());
        if let Some(callback) = callback {
            callback();
        }
    }
}

/// Handle for an extra data subscriber. Dropping it removes the subscriber.
#[must_use = "the subscription is removed as soon as the handle is dropped"]
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.remove_subscriber(self.id);
        }
    }
}

/// A persistent, bidirectional session connection.
pub struct SessionChannel {
    path: String,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    sink: tokio::sync::Mutex<Option<Box<dyn FrameSink>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SessionChannel {
    /// Create an unconnected channel for `path`.
    pub fn new(connector: Arc<dyn Connector>, path: impl Into<String>, callbacks: ChannelCallbacks) -> Self {
        let (state, _) = watch::channel(ChannelState::Idle);
        let shared = Arc::new(Shared {
            subscribers: Mutex::new(Subscribers::default()),
            on_close: Mutex::new(callbacks.on_close),
            on_error: Mutex::new(callbacks.on_error),
            state,
        });
        if let Some(on_data) = callbacks.on_data {
            shared.add_subscriber(on_data);
        }
        Self {
            path: path.into(),
            connector,
            shared,
            sink: tokio::sync::Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    /// Backend path this channel addresses.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current state.
    pub fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Open the connection. Resolves once the transport confirms it is open.
    ///
    /// Fails with `NotConnected` if the channel was closed before or while
    /// connecting; connecting an already open channel is a no-op.
    pub async fn connect(&self) -> Result<()> {
        match self.state() {
            ChannelState::Open => return Ok(()),
            ChannelState::Closed => return Err(SdkError::NotConnected),
            ChannelState::Idle => {}
        }

        let start = std::time::Instant::now();
        let connection = match self.connector.connect(&self.path).await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(path = %self.path, error = %e, "Session connect failed");
                self.shared.report_error(&e);
                return Err(e);
            }
        };

        let mut sink_guard = self.sink.lock().await;
        let mut sink = connection.sink;
        let opened = self.shared.state.send_if_modified(|state| {
            if *state == ChannelState::Idle {
                *state = ChannelState::Open;
                true
            } else {
                false
            }
        });
        if !opened {
            // close() won the race; drop the fresh connection.
            tracing::debug!(path = %self.path, "Channel closed while connecting");
            let _ = sink.close().await;
            return Err(SdkError::NotConnected);
        }
        *sink_guard = Some(sink);
        drop(sink_guard);

        let handle = tokio::spawn(read_loop(
            connection.frames,
            self.shared.clone(),
            self.path.clone(),
        ));
        if let Ok(mut reader) = self.reader.lock() {
            *reader = Some(handle);
        }

        tracing::info!(
            path = %self.path,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Session channel open"
        );
        Ok(())
    }

    /// Send text input.
    pub async fn send(&self, text: &str) -> Result<()> {
        if !self.is_open() {
            return Err(SdkError::NotConnected);
        }
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(SdkError::NotConnected)?;
        tracing::trace!(path = %self.path, len = text.len(), "Sending input");
        sink.send_text(text.to_string()).await
    }

    /// Register an extra data subscriber, called after earlier subscribers.
    pub fn subscribe(&self, callback: impl FnMut(&str) + Send + 'static) -> Subscription {
        let id = self.shared.add_subscriber(Box::new(callback));
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Close the connection. Idempotent and safe in any state.
    ///
    /// Closing a connection never deletes the backend session it addresses.
    pub async fn close(&self) {
        if self.state() == ChannelState::Closed {
            return;
        }
        let was_open = self.state() == ChannelState::Open;

        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.close().await {
                tracing::debug!(path = %self.path, error = %e, "Close handshake failed");
            }
        }
        let reader = self.reader.lock().ok().and_then(|mut guard| guard.take());
        if let Some(reader) = reader {
            reader.abort();
        }

        self.shared.mark_closed();
        if was_open {
            tracing::info!(path = %self.path, "Session channel closed");
        }
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.reader.lock() {
            if let Some(reader) = guard.take() {
                reader.abort();
            }
        }
    }
}

async fn read_loop(mut frames: FrameStream, shared: Arc<Shared>, path: String) {
    let mut count = 0u64;
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(frame) => {
                count += 1;
                let text = frame.into_text();
                tracing::trace!(path = %path, len = text.len(), "Frame received");
                shared.deliver(&text);
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Session transport error");
                shared.report_error(&e);
                break;
            }
        }
    }
    tracing::debug!(path = %path, frames = count, "Remote side closed session channel");
    shared.mark_closed();
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory connector for channel and automation tests.

    use super::*;
    use crate::transport::{Connection, Frame};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Remote end of a mock connection.
    pub struct Remote {
        pub inbound: mpsc::UnboundedSender<Result<Frame>>,
        pub sent: mpsc::UnboundedReceiver<String>,
        pub closed: mpsc::UnboundedReceiver<()>,
    }

    impl Remote {
        pub fn text(&self, text: &str) {
            let _ = self.inbound.send(Ok(Frame::Text(text.to_string())));
        }
    }

    struct MockSink {
        sent: mpsc::UnboundedSender<String>,
        closed: mpsc::UnboundedSender<()>,
    }

    #[async_trait]
    impl FrameSink for MockSink {
        async fn send_text(&mut self, text: String) -> Result<()> {
            self.sent
                .send(text)
                .map_err(|_| SdkError::TransportFailure("remote gone".into()))
        }

        async fn close(&mut self) -> Result<()> {
            let _ = self.closed.send(());
            Ok(())
        }
    }

    /// Connector handing out one pre-built connection per call.
    pub struct MockConnector {
        pending: std::sync::Mutex<Vec<Connection>>,
        pub paths: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self, path: &str) -> Result<Connection> {
            self.paths.lock().unwrap().push(path.to_string());
            self.pending
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| SdkError::TransportFailure("connection refused".into()))
        }
    }

    pub fn mock_connector() -> (Arc<MockConnector>, Remote) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let frames = futures::stream::unfold(inbound_rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        })
        .boxed();
        let connection = Connection {
            sink: Box::new(MockSink {
                sent: sent_tx,
                closed: closed_tx,
            }),
            frames,
        };
        let connector = Arc::new(MockConnector {
            pending: std::sync::Mutex::new(vec![connection]),
            paths: std::sync::Mutex::new(Vec::new()),
        });
        let remote = Remote {
            inbound: inbound_tx,
            sent: sent_rx,
            closed: closed_rx,
        };
        (connector, remote)
    }

    /// Data callback recording every chunk into a shared vector.
    pub fn recording() -> (Arc<std::sync::Mutex<Vec<String>>>, DataCallback) {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: DataCallback = Box::new(move |data: &str| {
            sink.lock().unwrap().push(data.to_string());
        });
        (seen, callback)
    }
}
