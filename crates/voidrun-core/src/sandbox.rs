//! Sandbox handle - the per-sandbox entry point to every streaming surface.

use crate::dispatch::{EventDispatcher, Handlers, OutputCollector, StreamHandler};
use crate::error::Result;
use crate::event::ExitStatus;
use crate::http::ApiClient;
use crate::interpreter::{build_command, CodeOptions, CodeResult, Tee};
use crate::process::Commands;
use crate::pty::Pty;
use crate::transport::Connector;
use crate::watch::{FileWatcher, WatchOptions};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Identifier of a backend sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SandboxId(String);

impl SandboxId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SandboxId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SandboxId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One-shot command sent to the exec stream.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecRequest {
    pub command: String,
    /// Seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
}

impl ExecRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.as_secs().max(1));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Collected result of an exec stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// Absent if the stream ended without an exit event.
    pub exit: Option<ExitStatus>,
}

impl ExecOutput {
    pub fn exit_code(&self) -> Option<i32> {
        self.exit.as_ref().map(|s| s.exit_code)
    }

    pub fn success(&self) -> bool {
        self.exit.as_ref().is_some_and(ExitStatus::success)
    }
}

impl From<OutputCollector> for ExecOutput {
    fn from(collector: OutputCollector) -> Self {
        Self {
            stdout: collector.stdout.concat(),
            stderr: collector.stderr.concat(),
            exit: collector.exit,
        }
    }
}

/// Handle to an existing sandbox. Cheap to clone; holds no connection.
#[derive(Clone)]
pub struct Sandbox {
    id: SandboxId,
    api: ApiClient,
    connector: Arc<dyn Connector>,
}

impl Sandbox {
    pub(crate) fn new(id: SandboxId, api: ApiClient, connector: Arc<dyn Connector>) -> Self {
        Self { id, api, connector }
    }

    pub fn id(&self) -> &SandboxId {
        &self.id
    }

    /// Background process operations.
    pub fn commands(&self) -> Commands {
        Commands::new(self.api.clone(), self.id.as_str())
    }

    /// Terminal sessions.
    pub fn pty(&self) -> Pty {
        Pty::new(self.api.clone(), self.connector.clone(), self.id.as_str())
    }

    /// Run a command and stream its events to `handler` until the stream ends
    /// or `cancel` fires.
    pub async fn exec_stream<H: StreamHandler + ?Sized>(
        &self,
        request: &ExecRequest,
        handler: &mut H,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let start = std::time::Instant::now();
        tracing::debug!(sandbox_id = %self.id, cmd = %request.command, "Executing command");
        let stream = self
            .api
            .post_event_stream(&format!("/sandboxes/{}/exec-stream", self.id), request)
            .await?;
        let result = EventDispatcher::new().run(stream, handler, cancel).await;
        tracing::debug!(
            sandbox_id = %self.id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Exec stream finished"
        );
        result
    }

    /// Run a command to completion and collect its output.
    pub async fn exec(&self, request: &ExecRequest) -> Result<ExecOutput> {
        let mut collector = OutputCollector::default();
        self.exec_stream(request, &mut collector, None).await?;
        Ok(collector.into())
    }

    /// Run a code snippet.
    pub async fn run_code(&self, code: &str, options: CodeOptions) -> Result<CodeResult> {
        self.run_code_with(code, options, &mut Handlers::new()).await
    }

    /// Run a code snippet, streaming its output to `handler` as it arrives.
    pub async fn run_code_with<H: StreamHandler + ?Sized>(
        &self,
        code: &str,
        options: CodeOptions,
        handler: &mut H,
    ) -> Result<CodeResult> {
        let command = build_command(code, options.language, chrono::Utc::now().timestamp_millis());
        tracing::debug!(sandbox_id = %self.id, language = %options.language, "Running code");
        let request = ExecRequest {
            command,
            timeout: Some(options.timeout.as_secs()),
            cwd: options.cwd,
            env: (!options.env.is_empty()).then_some(options.env),
        };
        let mut tee = Tee::new(handler);
        self.exec_stream(&request, &mut tee, None).await?;
        Ok(CodeResult::from_collector(tee.collector))
    }

    /// Watch a directory for changes.
    pub async fn watch(&self, path: &str, options: WatchOptions) -> Result<FileWatcher> {
        FileWatcher::start(&self.api, self.connector.clone(), self.id.as_str(), path, options).await
    }
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_request_shape() {
        let request = ExecRequest::new("ls -la")
            .timeout(Duration::from_secs(10))
            .cwd("/app")
            .env("DEBUG", "1");
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"command":"ls -la","timeout":10,"cwd":"/app","env":{"DEBUG":"1"}})
        );
        assert_eq!(
            serde_json::to_value(ExecRequest::new("pwd")).unwrap(),
            serde_json::json!({"command":"pwd"})
        );
    }

    #[test]
    fn test_exec_output_from_collector() {
        let output = ExecOutput::from(OutputCollector {
            stdout: vec!["a".into(), "b".into()],
            stderr: vec!["w".into()],
            exit: Some(ExitStatus {
                exit_code: 0,
                error: None,
            }),
            errors: vec![],
        });
        assert_eq!(output.stdout, "ab");
        assert_eq!(output.stderr, "w");
        assert!(output.success());

        let missing = ExecOutput::default();
        assert_eq!(missing.exit_code(), None);
        assert!(!missing.success());
    }

    #[test]
    fn test_sandbox_id() {
        let id = SandboxId::from("sb-1");
        assert_eq!(id.to_string(), "sb-1");
        assert_eq!(id.as_str(), "sb-1");
    }
}
