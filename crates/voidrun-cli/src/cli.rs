//! Command-line interface definition using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use voidrun_core::{ClientConfig, Language};

/// voidrun - drive VoidRun sandboxes from the terminal
#[derive(Parser, Debug)]
#[command(name = "voidrun")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// API key (overrides VR_API_KEY)
    #[arg(long, env = "VR_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// API base URL (overrides VR_API_URL)
    #[arg(long, env = "VR_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Sandbox to operate on
    #[arg(short, long, env = "VR_SANDBOX_ID", global = true)]
    pub sandbox: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Environment configuration with flag overrides applied.
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::from_env();
        if let Some(key) = &self.api_key {
            config = config.with_api_key(key.clone());
        }
        if let Some(url) = &self.api_url {
            config = config.with_base_url(url.clone());
        }
        config
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command and stream its output
    Exec {
        /// Command line, passed to the sandbox shell
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,

        /// Working directory
        #[arg(long)]
        cwd: Option<String>,

        /// Backend timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Environment variables (KEY=VALUE)
        #[arg(short, long = "env", value_parser = parse_key_value)]
        env: Vec<(String, String)>,
    },

    /// Start a background process and print its PID
    Run {
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,

        #[arg(long)]
        cwd: Option<String>,

        #[arg(short, long = "env", value_parser = parse_key_value)]
        env: Vec<(String, String)>,
    },

    /// List running background processes
    Ps,

    /// Ask the backend to terminate a process
    Kill { pid: u32 },

    /// Block until a process exits and print its status
    Wait { pid: u32 },

    /// Stream a running process's output
    Attach { pid: u32 },

    /// Run a code snippet from a file (`-` for stdin)
    Code {
        file: PathBuf,

        /// python, javascript, typescript, node, bash or sh
        #[arg(short, long, default_value = "python", value_parser = parse_language)]
        language: Language,

        /// Backend timeout in seconds
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },

    /// Open a terminal session
    Shell {
        /// Persistent session to connect to (ephemeral when omitted)
        #[arg(long)]
        session: Option<String>,

        /// Run one command, print its output and exit
        #[arg(short, long)]
        command: Option<String>,

        /// Prompt regex used with --command
        #[arg(long, default_value = r"[$#>] $")]
        prompt: String,

        /// Seconds to wait for the prompt with --command
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        /// Resize a persistent session first (COLSxROWS)
        #[arg(long, value_parser = parse_size)]
        size: Option<(u16, u16)>,
    },

    /// Manage persistent terminal sessions
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Print filesystem changes under a path
    Watch {
        path: String,

        #[arg(short, long)]
        recursive: bool,

        /// Skip dotfiles
        #[arg(long)]
        ignore_hidden: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum SessionAction {
    /// List sessions
    List,
    /// Create a session and print its ID
    Create,
    /// Delete a session
    Delete { id: String },
}

/// Seconds flag to a duration.
pub fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))?;
    if key.is_empty() {
        return Err(format!("empty key in {s:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_language(s: &str) -> Result<Language, String> {
    s.parse().map_err(|e: voidrun_core::SdkError| e.to_string())
}

fn parse_size(s: &str) -> Result<(u16, u16), String> {
    let (cols, rows) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected COLSxROWS, got {s:?}"))?;
    let cols = cols.parse().map_err(|e| format!("bad column count: {e}"))?;
    let rows = rows.parse().map_err(|e| format!("bad row count: {e}"))?;
    Ok((cols, rows))
}
