//! voidrun CLI entry point.
//!
//! Thin front end over `voidrun-core`: streams command output, manages
//! background processes and terminal sessions, and prints file changes.
//! Logs go to stderr so stdout carries only sandbox output.

mod cli;

use anyhow::{bail, Context};
use clap::Parser;
use cli::{secs, Cli, Commands, SessionAction};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use voidrun_core::{
    CancellationToken, Client, CodeOptions, ExecRequest, ExitStatus, Pid, PromptMatcher,
    PtyOptions, RunCommandOptions, RunOptions, Sandbox, SdkError, SessionId, StreamHandler,
    WatchOptions,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("voidrun=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = cli.client_config();
    tracing::debug!(?config, "Configuration loaded");
    let client = Client::new(config).context("invalid client configuration")?;

    let sandbox_id = cli
        .sandbox
        .clone()
        .context("no sandbox given (use --sandbox or VR_SANDBOX_ID)")?;
    let sandbox = client.sandbox(sandbox_id);

    let code = run(sandbox, cli.command).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Execute one subcommand; returns the process exit code.
async fn run(sandbox: Sandbox, command: Commands) -> anyhow::Result<i32> {
    match command {
        Commands::Exec {
            command,
            cwd,
            timeout,
            env,
        } => {
            let mut request = ExecRequest::new(command.join(" "));
            if let Some(cwd) = cwd {
                request = request.cwd(cwd);
            }
            if let Some(timeout) = timeout {
                request = request.timeout(secs(timeout));
            }
            for (key, value) in env {
                request = request.env(key, value);
            }
            let cancel = cancel_on_ctrl_c();
            let mut printer = Printer::default();
            match sandbox.exec_stream(&request, &mut printer, Some(&cancel)).await {
                Ok(()) => Ok(printer.exit_code()),
                Err(SdkError::Aborted) => Ok(130),
                Err(e) => Err(e.into()),
            }
        }

        Commands::Run { command, cwd, env } => {
            let options = RunOptions {
                env: env.into_iter().collect(),
                cwd,
                timeout: None,
            };
            let handle = sandbox.commands().run(&command.join(" "), options).await?;
            println!("{}", handle.pid);
            Ok(0)
        }

        Commands::Ps => {
            let processes = sandbox.commands().list().await?;
            if processes.is_empty() {
                eprintln!("no running processes");
            }
            for process in processes {
                println!(
                    "{}\t{}\t{}",
                    process.pid,
                    process.started_at.format("%Y-%m-%d %H:%M:%S"),
                    process.command
                );
            }
            Ok(0)
        }

        Commands::Kill { pid } => {
            let outcome = sandbox.commands().kill(Pid(pid)).await?;
            if !outcome.message.is_empty() {
                println!("{}", outcome.message);
            }
            Ok(if outcome.success { 0 } else { 1 })
        }

        Commands::Wait { pid } => {
            let status = sandbox.commands().wait(Pid(pid)).await?;
            if let Some(error) = &status.error {
                eprintln!("{error}");
            }
            println!("{}", status.exit_code);
            Ok(status.exit_code)
        }

        Commands::Attach { pid } => {
            let cancel = cancel_on_ctrl_c();
            let mut printer = Printer::default();
            match sandbox
                .commands()
                .attach(Pid(pid), &mut printer, Some(&cancel))
                .await
            {
                Ok(()) => Ok(printer.exit_code()),
                Err(SdkError::Aborted) => Ok(0),
                Err(e) => Err(e.into()),
            }
        }

        Commands::Code {
            file,
            language,
            timeout,
        } => {
            let code = if file.as_os_str() == "-" {
                let mut code = String::new();
                let mut stdin = BufReader::new(tokio::io::stdin());
                while stdin.read_line(&mut code).await? > 0 {}
                code
            } else {
                tokio::fs::read_to_string(&file)
                    .await
                    .with_context(|| format!("failed to read {}", file.display()))?
            };
            let options = CodeOptions {
                language,
                timeout: secs(timeout),
                ..CodeOptions::default()
            };
            let result = sandbox
                .run_code_with(&code, options, &mut Printer::default())
                .await?;
            if let Some(value) = &result.results {
                eprintln!("result: {value}");
            }
            Ok(result.exit_code.unwrap_or(0))
        }

        Commands::Shell {
            session,
            command,
            prompt,
            timeout,
            size,
        } => shell(&sandbox, session, command, &prompt, timeout, size).await,

        Commands::Sessions { action } => {
            let pty = sandbox.pty();
            match action {
                SessionAction::List => {
                    for session in pty.list_sessions().await? {
                        println!(
                            "{}\t{}\tclients={}\t{}",
                            session.session_id,
                            session.created_at.format("%Y-%m-%d %H:%M:%S"),
                            session.client_count,
                            if session.alive { "alive" } else { "dead" }
                        );
                    }
                }
                SessionAction::Create => {
                    let session = pty.create_session().await?;
                    println!("{}", session.session_id);
                }
                SessionAction::Delete { id } => {
                    pty.delete_session(&SessionId::new(id)).await?;
                }
            }
            Ok(0)
        }

        Commands::Watch {
            path,
            recursive,
            ignore_hidden,
        } => {
            let options = WatchOptions::default()
                .recursive(recursive)
                .ignore_hidden(ignore_hidden)
                .on_event(|event| println!("{:?}\t{}", event.kind, event.path))
                .on_error(|e| eprintln!("watch error: {e}"));
            let watcher = sandbox.watch(&path, options).await?;
            tracing::info!(session_id = %watcher.session_id(), "Press Ctrl+C to stop");
            tokio::select! {
                _ = watcher.closed() => {}
                _ = tokio::signal::ctrl_c() => watcher.close().await,
            }
            Ok(0)
        }
    }
}

async fn shell(
    sandbox: &Sandbox,
    session: Option<String>,
    command: Option<String>,
    prompt: &str,
    timeout: u64,
    size: Option<(u16, u16)>,
) -> anyhow::Result<i32> {
    let mut options = PtyOptions {
        session_id: session.map(SessionId::new),
        ..PtyOptions::default()
    };
    if command.is_none() {
        options = options
            .on_data(|data| {
                print!("{data}");
                let _ = std::io::stdout().flush();
            })
            .on_close(|| eprintln!("\r\n[session closed]"));
    }
    options = options.on_error(|e| eprintln!("session error: {e}"));

    let session = sandbox.pty().connect(options).await?;
    if let Some((cols, rows)) = size {
        session.resize(cols, rows).await?;
    }

    if let Some(command) = command {
        let options = RunCommandOptions::default()
            .with_timeout(secs(timeout))
            .with_prompt(PromptMatcher::regex(prompt)?);
        let result = session.run_command(&command, options).await;
        session.close().await;
        return match result {
            Ok(output) => {
                print!("{output}");
                Ok(0)
            }
            Err(SdkError::CommandTimeout { output, .. }) => {
                print!("{output}");
                bail!("no prompt after {timeout}s")
            }
            Err(e) => Err(e.into()),
        };
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => session.send_input(&format!("{line}\n")).await?,
                None => break,
            },
            _ = session.closed() => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    session.close().await;
    Ok(0)
}

/// Mirrors stream output onto this process's stdout/stderr.
#[derive(Default)]
struct Printer {
    exit: Option<ExitStatus>,
}

impl Printer {
    fn exit_code(&self) -> i32 {
        self.exit.as_ref().map(|s| s.exit_code).unwrap_or(0)
    }
}

impl StreamHandler for Printer {
    fn on_stdout(&mut self, data: &str) {
        println!("{data}");
    }

    fn on_stderr(&mut self, data: &str) {
        eprintln!("{data}");
    }

    fn on_exit(&mut self, status: ExitStatus) {
        if let Some(error) = &status.error {
            eprintln!("{error}");
        }
        self.exit = Some(status);
    }

    fn on_error(&mut self, error: &SdkError) {
        tracing::warn!(error = %error, "Stream error");
    }
}

/// Token cancelled on the first Ctrl+C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}
