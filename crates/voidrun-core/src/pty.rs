//! Interactive terminal sessions.
//!
//! [`Pty`] manages backend sessions over REST and opens connections;
//! [`PtySession`] is one open connection, with raw input, prompt-driven
//! command automation and resize.

use crate::channel::{
    ChannelCallbacks, ChannelState, CloseCallback, DataCallback, ErrorCallback, SessionChannel,
    Subscription,
};
use crate::error::{Result, SdkError};
use crate::http::{null_as_empty, ApiClient, Envelope};
use crate::session::{SessionDescriptor, SessionId, SessionMode};
use crate::transport::Connector;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default deadline for [`PtySession::run_command`].
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Decides when accumulated output shows a prompt.
#[derive(Debug, Clone, Default)]
pub enum PromptMatcher {
    /// Output ends with a shell prompt marker: `$`, `#` or `>` followed by a
    /// space. Same as the regex `[$#>] $`.
    #[default]
    ShellPrompt,
    /// Output contains this text anywhere.
    Literal(String),
    /// Pattern matches anywhere in the output.
    Regex(Regex),
}

impl PromptMatcher {
    pub fn literal(text: impl Into<String>) -> Self {
        Self::Literal(text.into())
    }

    /// Compile a regex prompt.
    pub fn regex(pattern: &str) -> Result<Self> {
        Ok(Self::Regex(Regex::new(pattern)?))
    }

    pub fn is_match(&self, output: &str) -> bool {
        match self {
            Self::ShellPrompt => ["$ ", "# ", "> "]
                .iter()
                .any(|marker| output.ends_with(marker)),
            Self::Literal(text) => output.contains(text.as_str()),
            Self::Regex(re) => re.is_match(output),
        }
    }
}

impl From<Regex> for PromptMatcher {
    fn from(re: Regex) -> Self {
        Self::Regex(re)
    }
}

/// Options for [`PtySession::run_command`].
#[derive(Debug, Clone)]
pub struct RunCommandOptions {
    pub timeout: Duration,
    pub prompt: PromptMatcher,
}

impl Default for RunCommandOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
            prompt: PromptMatcher::default(),
        }
    }
}

impl RunCommandOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_prompt(mut self, prompt: PromptMatcher) -> Self {
        self.prompt = prompt;
        self
    }
}

/// Options for [`Pty::connect`]. Without a `session_id` the connection is
/// ephemeral.
#[derive(Default)]
pub struct PtyOptions {
    pub session_id: Option<SessionId>,
    pub on_data: Option<DataCallback>,
    pub on_close: Option<CloseCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl PtyOptions {
    pub fn persistent(session_id: impl Into<SessionId>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    pub fn on_data(mut self, callback: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_data = Some(Box::new(callback));
        self
    }

    pub fn on_close(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl FnMut(&SdkError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }
}

#[derive(Deserialize)]
struct SessionList {
    #[serde(default, deserialize_with = "null_as_empty")]
    sessions: Vec<SessionDescriptor>,
}

#[derive(Serialize)]
struct ResizeRequest {
    cols: u16,
    rows: u16,
}

/// PTY operations for one sandbox.
#[derive(Clone)]
pub struct Pty {
    api: ApiClient,
    connector: Arc<dyn Connector>,
    sandbox_id: String,
}

impl Pty {
    pub(crate) fn new(api: ApiClient, connector: Arc<dyn Connector>, sandbox_id: impl Into<String>) -> Self {
        Self {
            api,
            connector,
            sandbox_id: sandbox_id.into(),
        }
    }

    fn sessions_path(&self) -> String {
        format!("/sandboxes/{}/pty/sessions", self.sandbox_id)
    }

    /// Persistent sessions known to the backend. Empty when there are none.
    pub async fn list_sessions(&self) -> Result<Vec<SessionDescriptor>> {
        let envelope: Envelope<SessionList> = self.api.get_json(&self.sessions_path()).await?;
        Ok(envelope.data.map(|list| list.sessions).unwrap_or_default())
    }

    /// Create a persistent session. It lives until deleted, independent of
    /// any connection.
    pub async fn create_session(&self) -> Result<SessionDescriptor> {
        let envelope: Envelope<SessionDescriptor> = self
            .api
            .post_json(&self.sessions_path(), &serde_json::json!({}))
            .await?;
        let descriptor = envelope.data.ok_or_else(|| SdkError::BackendRequest {
            status: None,
            message: "create session response carried no data".into(),
        })?;
        tracing::info!(
            sandbox_id = %self.sandbox_id,
            session_id = %descriptor.session_id,
            "PTY session created"
        );
        Ok(descriptor)
    }

    pub async fn delete_session(&self, session_id: &SessionId) -> Result<()> {
        tracing::debug!(sandbox_id = %self.sandbox_id, session_id = %session_id, "Deleting PTY session");
        self.api
            .delete(&format!("{}/{session_id}", self.sessions_path()))
            .await
    }

    /// Open a connection and wait for the initial prompt to settle.
    pub async fn connect(&self, options: PtyOptions) -> Result<PtySession> {
        let mode = SessionMode::from(options.session_id);
        let path = match &mode {
            SessionMode::Ephemeral => format!("/sandboxes/{}/pty", self.sandbox_id),
            SessionMode::Persistent(id) => format!("{}/{id}", self.sessions_path()),
        };
        tracing::debug!(sandbox_id = %self.sandbox_id, mode = %mode, "Connecting PTY");

        let channel = SessionChannel::new(
            self.connector.clone(),
            path,
            ChannelCallbacks {
                on_data: options.on_data,
                on_close: options.on_close,
                on_error: options.on_error,
            },
        );
        channel.connect().await?;

        let settle = self.api.config().pty_settle;
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        Ok(PtySession {
            channel,
            mode,
            api: self.api.clone(),
            sandbox_id: self.sandbox_id.clone(),
        })
    }
}

/// One open terminal connection.
pub struct PtySession {
    channel: SessionChannel,
    mode: SessionMode,
    api: ApiClient,
    sandbox_id: String,
}

impl PtySession {
    pub fn mode(&self) -> &SessionMode {
        &self.mode
    }

    /// Backend session, if this connection is persistent.
    pub fn session_id(&self) -> Option<&SessionId> {
        self.mode.session_id()
    }

    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// Wait until the connection closes from either side.
    pub async fn closed(&self) {
        let mut state = self.channel.watch_state();
        let _ = state.wait_for(|s| *s == ChannelState::Closed).await;
    }

    /// Send raw input (keystrokes, control characters).
    pub async fn send_input(&self, data: &str) -> Result<()> {
        self.channel.send(data).await
    }

    /// Observe output alongside the primary data callback.
    pub fn subscribe(&self, callback: impl FnMut(&str) + Send + 'static) -> Subscription {
        self.channel.subscribe(callback)
    }

    /// Send `command` and return everything received until the prompt matches.
    ///
    /// Output keeps flowing to the primary data callback the whole time. On
    /// timeout the error carries the output collected so far.
    pub async fn run_command(&self, command: &str, options: RunCommandOptions) -> Result<String> {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let mut state = self.channel.watch_state();
        // Registered before sending so no output can slip past.
        let _collector = self.channel.subscribe(move |chunk| {
            let _ = tx.send(chunk.to_string());
        });

        let line = if command.ends_with('\n') {
            command.to_string()
        } else {
            format!("{command}\n")
        };
        tracing::debug!(sandbox_id = %self.sandbox_id, cmd = %command, "Running PTY command");
        self.channel.send(&line).await?;

        let start = std::time::Instant::now();
        let deadline = tokio::time::sleep(options.timeout);
        tokio::pin!(deadline);
        let mut output = String::new();

        loop {
            tokio::select! {
                biased;
                chunk = rx.recv() => {
                    let Some(chunk) = chunk else {
                        return Err(SdkError::NotConnected);
                    };
                    output.push_str(&chunk);
                    if options.prompt.is_match(&output) {
                        tracing::debug!(
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            len = output.len(),
                            "Prompt matched"
                        );
                        return Ok(output);
                    }
                }
                closed = state.wait_for(|s| *s == ChannelState::Closed) => {
                    // Release the state borrow before anything else runs.
                    drop(closed);
                    drain(&mut rx, &mut output);
                    if options.prompt.is_match(&output) {
                        return Ok(output);
                    }
                    tracing::warn!(sandbox_id = %self.sandbox_id, "PTY closed while waiting for prompt");
                    return Err(SdkError::NotConnected);
                }
                _ = &mut deadline => {
                    drain(&mut rx, &mut output);
                    tracing::warn!(
                        sandbox_id = %self.sandbox_id,
                        timeout_ms = options.timeout.as_millis() as u64,
                        "PTY command timed out"
                    );
                    return Err(SdkError::CommandTimeout {
                        timeout: options.timeout,
                        output,
                    });
                }
            }
        }
    }

    /// Resize the terminal. A no-op for ephemeral sessions.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let SessionMode::Persistent(session_id) = &self.mode else {
            tracing::warn!(
                sandbox_id = %self.sandbox_id,
                "Resize is only supported for persistent sessions; ignoring"
            );
            return Ok(());
        };
        tracing::debug!(session_id = %session_id, cols, rows, "Resizing PTY");
        self.api
            .post_unit(
                &format!("/sandboxes/{}/pty/sessions/{session_id}/resize", self.sandbox_id),
                &ResizeRequest { cols, rows },
            )
            .await
    }

    /// Close this connection. A persistent session stays alive on the backend.
    pub async fn close(&self) {
        self.channel.close().await;
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<String>, output: &mut String) {
    while let Ok(chunk) = rx.try_recv() {
        output.push_str(&chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::*;
    use crate::config::ClientConfig;

    fn api() -> ApiClient {
        let config = ClientConfig::new("key", "http://127.0.0.1:9/api").with_pty_settle(Duration::ZERO);
        ApiClient::new(config).unwrap()
    }

    #[test]
    fn test_shell_prompt_matches_regex_semantics() {
        let prompt = PromptMatcher::default();
        let re = PromptMatcher::regex(r"[$#>] $").unwrap();
        for sample in ["user@box:~$ ", "root# ", "> ", "hi\n$ ", "$", "$ x", "", "a>  "] {
            assert_eq!(prompt.is_match(sample), re.is_match(sample), "{sample:?}");
        }
    }

    #[test]
    fn test_invalid_regex_prompt() {
        assert!(matches!(
            PromptMatcher::regex("(unclosed"),
            Err(SdkError::InvalidPrompt(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_paths() {
        let (connector, _remote) = mock_connector();
        let pty = Pty::new(api(), connector.clone(), "sb");
        let session = pty.connect(PtyOptions::default()).await.unwrap();
        assert_eq!(session.mode(), &SessionMode::Ephemeral);
        assert_eq!(*connector.paths.lock().unwrap(), vec!["/sandboxes/sb/pty"]);

        let (connector, _remote) = mock_connector();
        let pty = Pty::new(api(), connector.clone(), "sb");
        let session = pty.connect(PtyOptions::persistent("s1")).await.unwrap();
        assert_eq!(session.session_id().map(SessionId::as_str), Some("s1"));
        assert_eq!(
            *connector.paths.lock().unwrap(),
            vec!["/sandboxes/sb/pty/sessions/s1"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_command_resolves_on_prompt() {
        let (connector, mut remote) = mock_connector();
        let (primary, on_data) = recording();
        let pty = Pty::new(api(), connector, "sb");
        let session = pty
            .connect(PtyOptions {
                on_data: Some(on_data),
                ..Default::default()
            })
            .await
            .unwrap();

        let options = RunCommandOptions::default().with_prompt(PromptMatcher::regex(r"\$ $").unwrap());
        let (result, _) = tokio::join!(session.run_command("echo hi", options), async {
            assert_eq!(remote.sent.recv().await.as_deref(), Some("echo hi\n"));
            remote.text("hi\n");
            remote.text("$ ");
        });

        assert_eq!(result.unwrap(), "hi\n$ ");
        assert_eq!(*primary.lock().unwrap(), vec!["hi\n", "$ "]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_command_literal_prompt_keeps_newline() {
        let (connector, mut remote) = mock_connector();
        let session = Pty::new(api(), connector, "sb")
            .connect(PtyOptions::default())
            .await
            .unwrap();

        let options = RunCommandOptions::default().with_prompt(PromptMatcher::literal("READY>"));
        let (result, _) = tokio::join!(session.run_command("start\n", options), async {
            assert_eq!(remote.sent.recv().await.as_deref(), Some("start\n"));
            remote.text("booting\nREA");
            remote.text("DY>");
        });
        assert_eq!(result.unwrap(), "booting\nREADY>");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_command_timeout_keeps_primary_callback() {
        let (connector, mut remote) = mock_connector();
        let (primary, on_data) = recording();
        let session = Pty::new(api(), connector, "sb")
            .connect(PtyOptions {
                on_data: Some(on_data),
                ..Default::default()
            })
            .await
            .unwrap();

        let options = RunCommandOptions::default().with_timeout(Duration::from_secs(2));
        let (result, _) = tokio::join!(session.run_command("sleep 100", options), async {
            remote.sent.recv().await;
            remote.text("partial");
        });

        match result {
            Err(SdkError::CommandTimeout { timeout, output }) => {
                assert_eq!(timeout, Duration::from_secs(2));
                assert_eq!(output, "partial");
            }
            other => panic!("expected timeout, got {other:?}"),
        }

        remote.text("later");
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*primary.lock().unwrap(), vec!["partial", "later"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_command_send_failure() {
        let (connector, remote) = mock_connector();
        let (primary, on_data) = recording();
        let session = Pty::new(api(), connector, "sb")
            .connect(PtyOptions {
                on_data: Some(on_data),
                ..Default::default()
            })
            .await
            .unwrap();

        let Remote { inbound, sent, .. } = remote;
        drop(sent);
        let result = session.run_command("ls", RunCommandOptions::default()).await;
        assert!(matches!(result, Err(SdkError::TransportFailure(_))));

        inbound
            .send(Ok(crate::transport::Frame::Text("x".into())))
            .unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*primary.lock().unwrap(), vec!["x"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_command_channel_closed() {
        let (connector, mut remote) = mock_connector();
        let session = Pty::new(api(), connector, "sb")
            .connect(PtyOptions::default())
            .await
            .unwrap();

        let (result, _) = tokio::join!(session.run_command("exit", RunCommandOptions::default()), async {
            remote.sent.recv().await;
            remote.text("logout\n");
            let Remote { inbound, .. } = remote;
            drop(inbound);
        });
        assert!(matches!(result, Err(SdkError::NotConnected)));
    }

    #[tokio::test]
    async fn test_resize_ephemeral_is_noop() {
        let (connector, _remote) = mock_connector();
        let session = Pty::new(api(), connector, "sb")
            .connect(PtyOptions::default())
            .await
            .unwrap();
        // No request is made, so the unreachable base URL is never contacted.
        session.resize(120, 40).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_keeps_running_and_is_idempotent() {
        let (connector, mut remote) = mock_connector();
        let session = Pty::new(api(), connector, "sb")
            .connect(PtyOptions::persistent("s1"))
            .await
            .unwrap();
        session.close().await;
        session.close().await;
        assert_eq!(session.state(), ChannelState::Closed);
        assert!(remote.closed.recv().await.is_some());
        assert!(matches!(
            session.send_input("x").await,
            Err(SdkError::NotConnected)
        ));
    }
}
