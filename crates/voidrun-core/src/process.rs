//! Background processes: run, list, kill, wait and attach by PID.
//!
//! The backend is the source of truth. The client keeps no process table;
//! [`Commands::list`] is a point-in-time snapshot that omits finished
//! processes.

use crate::dispatch::{EventDispatcher, StreamHandler};
use crate::error::{Result, SdkError};
use crate::event::ExitStatus;
use crate::http::{null_as_empty, ApiClient};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Process identifier inside a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Pid {
    fn from(pid: u32) -> Self {
        Self(pid)
    }
}

/// A backend-spawned process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessHandle {
    pub pid: Pid,
    pub command: String,
    #[serde(rename = "startTime", alias = "startedAt")]
    pub started_at: DateTime<Utc>,
}

/// Options for [`Commands::run`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub env: HashMap<String, String>,
    pub cwd: Option<String>,
    /// Backend-enforced limit; none by default.
    pub timeout: Option<Duration>,
}

/// Outcome of a kill request. Success does not mean the process has exited.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KillOutcome {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Serialize)]
struct RunRequest<'a> {
    command: &'a str,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    env: &'a HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cwd: Option<&'a str>,
    /// Seconds; 0 means no limit.
    timeout: u64,
}

#[derive(Serialize)]
struct PidRequest {
    pid: Pid,
}

#[derive(Deserialize)]
struct RunResponse {
    #[serde(default = "default_true")]
    success: bool,
    pid: Pid,
    #[serde(default)]
    command: Option<String>,
}

#[derive(Deserialize)]
struct ProcessEntry {
    #[serde(flatten)]
    handle: ProcessHandle,
    #[serde(default)]
    running: Option<bool>,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default, deserialize_with = "null_as_empty")]
    processes: Vec<ProcessEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WaitResponse {
    #[serde(default = "default_true")]
    success: bool,
    exit_code: i32,
    #[serde(default)]
    error: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ListResponse {
    /// Live processes only; entries reported as finished are pruned.
    fn into_snapshot(self) -> Vec<ProcessHandle> {
        self.processes
            .into_iter()
            .filter(|entry| entry.running != Some(false))
            .map(|entry| entry.handle)
            .collect()
    }
}

/// Process operations for one sandbox.
#[derive(Clone)]
pub struct Commands {
    api: ApiClient,
    sandbox_id: String,
}

impl Commands {
    pub(crate) fn new(api: ApiClient, sandbox_id: impl Into<String>) -> Self {
        Self {
            api,
            sandbox_id: sandbox_id.into(),
        }
    }

    fn path(&self, op: &str) -> String {
        format!("/sandboxes/{}/commands/{op}", self.sandbox_id)
    }

    /// Start a background process.
    pub async fn run(&self, command: &str, options: RunOptions) -> Result<ProcessHandle> {
        tracing::debug!(sandbox_id = %self.sandbox_id, cmd = %command, "Starting background process");
        let request = RunRequest {
            command,
            env: &options.env,
            cwd: options.cwd.as_deref(),
            timeout: options.timeout.map(|t| t.as_secs()).unwrap_or(0),
        };
        let response: RunResponse = self.api.post_json(&self.path("run"), &request).await?;
        if !response.success {
            return Err(SdkError::BackendRequest {
                status: None,
                message: format!("backend rejected run request for {command:?}"),
            });
        }
        tracing::info!(sandbox_id = %self.sandbox_id, pid = %response.pid, "Process started");
        Ok(ProcessHandle {
            pid: response.pid,
            command: response.command.unwrap_or_else(|| command.to_string()),
            started_at: Utc::now(),
        })
    }

    /// Snapshot of live processes. Empty when nothing runs, never absent.
    pub async fn list(&self) -> Result<Vec<ProcessHandle>> {
        let response: ListResponse = self.api.get_json(&self.path("list")).await?;
        let snapshot = response.into_snapshot();
        tracing::trace!(sandbox_id = %self.sandbox_id, count = snapshot.len(), "Process list received");
        Ok(snapshot)
    }

    /// Request termination. Returns once the backend acknowledges.
    pub async fn kill(&self, pid: Pid) -> Result<KillOutcome> {
        tracing::debug!(sandbox_id = %self.sandbox_id, pid = %pid, "Killing process");
        self.api
            .post_json(&self.path("kill"), &PidRequest { pid })
            .await
    }

    /// Block until the backend reports the process's exit status.
    pub async fn wait(&self, pid: Pid) -> Result<ExitStatus> {
        tracing::debug!(sandbox_id = %self.sandbox_id, pid = %pid, "Waiting for process");
        let response: WaitResponse = self
            .api
            .post_json_untimed(&self.path("wait"), &PidRequest { pid })
            .await?;
        if !response.success && response.error.is_none() {
            tracing::warn!(pid = %pid, "Wait reported failure without an error message");
        }
        Ok(ExitStatus {
            exit_code: response.exit_code,
            error: response.error,
        })
    }

    /// Stream a running process's output to `handler` until it ends or
    /// `cancel` fires.
    pub async fn attach<H: StreamHandler + ?Sized>(
        &self,
        pid: Pid,
        handler: &mut H,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        tracing::debug!(sandbox_id = %self.sandbox_id, pid = %pid, "Attaching to process");
        let stream = self
            .api
            .post_event_stream(&self.path("attach"), &PidRequest { pid })
            .await?;
        EventDispatcher::new().run(stream, handler, cancel).await
    }
}
