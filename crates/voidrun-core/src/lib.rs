//! # voidrun-core
//!
//! Streaming client core for VoidRun sandboxes.
//!
//! This crate talks to a remote sandbox backend over two transports: a
//! text-framed server-push event stream (one-shot exec, process attach) and
//! persistent bidirectional connections (terminal sessions, file watches).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   voidrun-core (client)                  │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │     Client      │────▶│  Sandbox (per id)        │   │
//! │  │  - sandbox()    │     │  - exec_stream() / exec()│   │
//! │  └─────────────────┘     │  - run_code()            │   │
//! │                          │  - commands() / pty()    │   │
//! │                          │  - watch()               │   │
//! │                          └──────────────────────────┘   │
//! │             one-shot │                 │ persistent      │
//! │                      ▼                 ▼                 │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │ EventDecoder    │     │  SessionChannel          │   │
//! │  │   → Dispatcher  │     │  - subscribers           │   │
//! │  │   → Handler     │     │  - send() / close()      │   │
//! │  └─────────────────┘     └──────────────────────────┘   │
//! │           │ reqwest                    │ Connector       │
//! └───────────┼────────────────────────────┼─────────────────┘
//!             ▼                            ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │          VoidRun API (HTTP event stream / WebSocket)     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use voidrun_core::{Client, ExecRequest, Handlers, PtyOptions, RunCommandOptions};
//!
//! # async fn example() -> voidrun_core::Result<()> {
//! let client = Client::from_env()?;
//! let sandbox = client.sandbox("sb-123");
//!
//! // Stream a command's output
//! let mut handlers = Handlers::new()
//!     .on_stdout(|line| println!("{line}"))
//!     .on_exit(|status| println!("exit {}", status.exit_code));
//! sandbox
//!     .exec_stream(&ExecRequest::new("ls -la /"), &mut handlers, None)
//!     .await?;
//!
//! // Drive an interactive shell
//! let pty = sandbox.pty();
//! let session = pty.connect(PtyOptions::default()).await?;
//! let output = session
//!     .run_command("echo hello", RunCommandOptions::default())
//!     .await?;
//! println!("{output}");
//! session.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Exec streams**: stdout, stderr and exit status decoded from arbitrary chunk boundaries
//! - **Background processes**: run, list, kill, wait and attach by PID
//! - **Terminal sessions**: ephemeral or persistent, with prompt-driven automation
//! - **File watching**: change events over a persistent connection
//! - **Code interpreter**: Python, Node.js and shell snippets with parsed results

mod channel;
mod client;
mod config;
mod decoder;
mod dispatch;
mod error;
mod event;
mod http;
mod interpreter;
mod process;
mod pty;
mod sandbox;
mod session;
mod transport;
mod watch;

pub use channel::{
    ChannelCallbacks, ChannelState, CloseCallback, DataCallback, ErrorCallback, SessionChannel,
    Subscription,
};
pub use client::Client;
pub use config::{
    ClientConfig, ConfigError, DEFAULT_API_URL, DEFAULT_PTY_SETTLE, DEFAULT_REQUEST_TIMEOUT,
};
pub use decoder::EventDecoder;
pub use dispatch::{ByteStream, EventDispatcher, Handlers, OutputCollector, StreamHandler};
pub use error::{Result, SdkError};
pub use event::{EventKind, EventRecord, ExitStatus};
pub use http::ApiClient;
pub use interpreter::{
    build_command, parse_results, CodeOptions, CodeResult, Language, Logs, DEFAULT_CODE_TIMEOUT,
};
pub use process::{Commands, KillOutcome, Pid, ProcessHandle, RunOptions};
pub use pty::{
    PromptMatcher, Pty, PtyOptions, PtySession, RunCommandOptions, DEFAULT_COMMAND_TIMEOUT,
};
pub use sandbox::{ExecOutput, ExecRequest, Sandbox, SandboxId};
pub use session::{SessionDescriptor, SessionId, SessionMode};
pub use transport::{Connection, Connector, Frame, FrameSink, FrameStream, WsConnector};
pub use watch::{EventCallback, FileChangeEvent, FileChangeKind, FileWatcher, WatchOptions};

/// Re-exported so callers can cancel streams without a direct dependency.
pub use tokio_util::sync::CancellationToken;
