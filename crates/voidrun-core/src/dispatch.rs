//! Routing of decoded stream events to per-kind handlers.
//!
//! Used identically by one-shot exec streams and background-process attach.

use crate::decoder::EventDecoder;
use crate::error::{Result, SdkError};
use crate::event::{EventKind, EventRecord, ExitStatus};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

/// Chunked byte source feeding a dispatcher.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Receiver of dispatched stream events.
///
/// All methods default to no-ops, so implementors only override what they need.
/// Calls arrive sequentially, in stream order.
pub trait StreamHandler: Send {
    fn on_stdout(&mut self, _data: &str) {}

    fn on_stderr(&mut self, _data: &str) {}

    fn on_exit(&mut self, _status: ExitStatus) {}

    fn on_error(&mut self, _error: &SdkError) {}
}

type TextCallback = Box<dyn FnMut(&str) + Send>;

/// Closure-based [`StreamHandler`].
///
/// ```ignore
/// let handlers = Handlers::new()
///     .on_stdout(|line| print!("{line}"))
///     .on_exit(|status| println!("exit {}", status.exit_code));
/// ```
#[derive(Default)]
pub struct Handlers {
    stdout: Option<TextCallback>,
    stderr: Option<TextCallback>,
    exit: Option<Box<dyn FnMut(ExitStatus) + Send>>,
    error: Option<Box<dyn FnMut(&SdkError) + Send>>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_stdout(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.stdout = Some(Box::new(f));
        self
    }

    pub fn on_stderr(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.stderr = Some(Box::new(f));
        self
    }

    pub fn on_exit(mut self, f: impl FnMut(ExitStatus) + Send + 'static) -> Self {
        self.exit = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(&SdkError) + Send + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }
}

impl StreamHandler for Handlers {
    fn on_stdout(&mut self, data: &str) {
        if let Some(f) = self.stdout.as_mut() {
            f(data);
        }
    }

    fn on_stderr(&mut self, data: &str) {
        if let Some(f) = self.stderr.as_mut() {
            f(data);
        }
    }

    fn on_exit(&mut self, status: ExitStatus) {
        if let Some(f) = self.exit.as_mut() {
            f(status);
        }
    }

    fn on_error(&mut self, error: &SdkError) {
        if let Some(f) = self.error.as_mut() {
            f(error);
        }
    }
}

/// Routes records from one stream to a handler.
#[derive(Debug, Default)]
pub struct EventDispatcher {
    decoder: EventDecoder,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chunk and dispatch every event it completes.
    pub fn feed<H: StreamHandler + ?Sized>(&mut self, chunk: &[u8], handler: &mut H) {
        for record in self.decoder.push(chunk) {
            dispatch_record(record, handler);
        }
    }

    /// Dispatch whatever is left in the decoder at end of stream.
    pub fn finish<H: StreamHandler + ?Sized>(&mut self, handler: &mut H) {
        if let Some(record) = self.decoder.finish() {
            dispatch_record(record, handler);
        }
    }

    /// Drive a byte source to completion.
    ///
    /// Returns when the source ends. If `cancel` fires first, `Aborted` is
    /// reported to the handler and returned; a transport error is handled the
    /// same way. The source is dropped on every path.
    pub async fn run<S, B, H>(
        mut self,
        source: S,
        handler: &mut H,
        cancel: Option<&CancellationToken>,
    ) -> Result<()>
    where
        S: Stream<Item = Result<B>>,
        B: AsRef<[u8]>,
        H: StreamHandler + ?Sized,
    {
        let mut source = std::pin::pin!(source);
        let mut chunks = 0u64;

        loop {
            let next = match cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        tracing::debug!(chunks, "Stream cancelled by caller");
                        let err = SdkError::Aborted;
                        handler.on_error(&err);
                        return Err(err);
                    }
                    next = source.next() => next,
                },
                None => source.next().await,
            };

            match next {
                Some(Ok(chunk)) => {
                    chunks += 1;
                    self.feed(chunk.as_ref(), handler);
                }
                Some(Err(err)) => {
                    tracing::warn!(chunks, error = %err, "Stream read failed");
                    handler.on_error(&err);
                    return Err(err);
                }
                None => break,
            }
        }

        self.finish(handler);
        tracing::debug!(chunks, "Stream ended");
        Ok(())
    }
}

fn dispatch_record<H: StreamHandler + ?Sized>(record: EventRecord, handler: &mut H) {
    match record.kind {
        EventKind::Stdout => handler.on_stdout(&record.payload),
        EventKind::Stderr => handler.on_stderr(&record.payload),
        EventKind::Exit => match serde_json::from_str::<ExitStatus>(&record.payload) {
            Ok(status) => handler.on_exit(status),
            Err(e) => {
                tracing::warn!(payload = %record.payload, error = %e, "Malformed exit payload");
                handler.on_error(&SdkError::DecodeAmbiguity {
                    payload: record.payload,
                    reason: e.to_string(),
                });
            }
        },
        EventKind::Message => {
            tracing::trace!(payload_len = record.payload.len(), "Ignoring untyped event");
        }
        EventKind::Other(kind) => {
            tracing::trace!(kind = %kind, "Ignoring unknown event kind");
        }
    }
}

/// Accumulates a stream into stdout/stderr buffers and the exit status.
#[derive(Debug, Default, Clone)]
pub struct OutputCollector {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit: Option<ExitStatus>,
    pub errors: Vec<String>,
}

impl StreamHandler for OutputCollector {
    fn on_stdout(&mut self, data: &str) {
        self.stdout.push(data.to_string());
    }

    fn on_stderr(&mut self, data: &str) {
        self.stderr.push(data.to_string());
    }

    fn on_exit(&mut self, status: ExitStatus) {
        self.exit = Some(status);
    }

    fn on_error(&mut self, error: &SdkError) {
        self.errors.push(error.to_string());
    }
}
