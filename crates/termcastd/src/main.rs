//! Termcast daemon - PTY session mirroring and control server
//!
//! This binary runs as a background daemon that spawns worker processes
//! under PTYs and mirrors their terminals to subscribed viewers.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! termcastd start
//!
//! # Start the daemon (background/daemonized)
//! termcastd start -d
//!
//! # Stop the daemon
//! termcastd stop
//!
//! # Check daemon status
//! termcastd status
//!
//! # Client subcommands (talk to a running daemon)
//! termcastd spawn job-1 -- sh -c 'make test'
//! termcastd list
//! termcastd history job-1 --lines 50
//! termcastd terminate job-1
//!
//! # Custom socket path
//! TERMCAST_SOCKET=/run/termcast.sock termcastd start
//!
//! # Enable debug logging
//! RUST_LOG=termcastd=debug termcastd start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use termcast_core::SessionId;
use termcast_protocol::{ClientRequest, ServerMessage};

use termcastd::client::DaemonClient;
use termcastd::config::{state_dir, Config};
use termcastd::manager::spawn_manager;
use termcastd::server::DaemonServer;
use termcastd::store::RecordStore;

/// Termcast daemon - terminal mirroring for worker processes
#[derive(Parser, Debug)]
#[command(name = "termcastd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
    /// List sessions known to the running daemon
    List,
    /// Spawn a command under a mirrored PTY
    Spawn {
        /// Session id (also names the record and log files)
        session_id: String,
        /// Working directory for the child (defaults to the current dir)
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Command to run, after `--`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// Terminate a session (SIGTERM, grace period, SIGKILL)
    Terminate {
        /// Session id
        session_id: String,
    },
    /// Print the tail of a session's output log
    History {
        /// Session id
        session_id: String,
        /// Number of lines to print
        #[arg(long, default_value_t = 100)]
        lines: usize,
    },
}

/// Returns the path to the PID file.
fn pid_file_path() -> PathBuf {
    state_dir().join("termcastd.pid")
}

/// Returns the path to the daemonized-process log file.
fn log_file_path() -> PathBuf {
    state_dir().join("termcastd.log")
}

/// Reads the PID from the PID file, if it exists.
fn read_pid() -> Option<u32> {
    let path = pid_file_path();
    let mut file = File::open(&path).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

/// Writes the current PID to the PID file.
fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

/// Removes the PID file.
fn remove_pid_file() {
    let path = pid_file_path();
    let _ = fs::remove_file(path);
}

/// Checks if a process with the given PID is running.
fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// Checks if the daemon is already running.
fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        // Stale PID file - remove it
        remove_pid_file();
    }
    None
}

/// Sends SIGTERM to the daemon process.
fn stop_daemon(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {pid}");
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start { daemon: false });

    match command {
        Command::Start { daemon } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'termcastd stop' to stop it first.");
                process::exit(1);
            }

            if daemon {
                // Daemonize before starting the tokio runtime
                daemonize()?;
            }

            write_pid()?;

            let result = run_daemon();

            remove_pid_file();

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {pid})...");
                stop_daemon(pid)?;

                // Wait for the process to exit (up to 5 seconds)
                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");

                let config = Config::load();
                if config.socket_path.exists() {
                    println!("Socket: {}", config.socket_path.display());
                }
                println!("Store:  {}", config.store_dir.display());

                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
        Command::List => run_client(ClientRequest::list()),
        Command::Spawn {
            session_id,
            cwd,
            command,
        } => {
            let cwd = match cwd {
                Some(dir) => Some(dir),
                None => std::env::current_dir().ok(),
            };
            run_client(ClientRequest::spawn(SessionId::new(session_id), command, cwd))
        }
        Command::Terminate { session_id } => {
            run_client(ClientRequest::terminate(SessionId::new(session_id)))
        }
        Command::History { session_id, lines } => run_client(ClientRequest::history(
            SessionId::new(session_id),
            Some(lines),
        )),
    }
}

/// Daemonizes the current process.
fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = File::create(&log_path).context("Failed to create log file for stderr")?;

    let daemonize = Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr);

    daemonize.start().context("Failed to daemonize")?;

    Ok(())
}

/// Runs the daemon (async entry point).
#[tokio::main]
async fn run_daemon() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("termcastd=info".parse()?)
                .add_directive("termcast_core=info".parse()?)
                .add_directive("termcast_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "Termcast daemon starting"
    );

    let config = Config::load();

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let store = RecordStore::new(&config.store_dir).with_context(|| {
        format!("Failed to open session store at {}", config.store_dir.display())
    })?;
    info!(store = %store.dir().display(), "Session store ready");

    let socket_path = config.socket_path.clone();
    let manager = spawn_manager(config, store);
    info!("Session manager started");

    let server = DaemonServer::new(&socket_path, manager, cancel_token);

    info!(socket = %socket_path.display(), "Starting server");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Termcast daemon stopped");
    Ok(())
}

/// Runs one client request against the daemon socket and prints the reply.
#[tokio::main]
async fn run_client(request: ClientRequest) -> Result<()> {
    let config = Config::load();
    let mut client = DaemonClient::connect(&config.socket_path).await?;

    match client.request(&request).await? {
        ServerMessage::Sessions { sessions } => {
            if sessions.is_empty() {
                println!("No sessions.");
            } else {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            }
        }
        ServerMessage::Spawned { session } => {
            println!("{}", serde_json::to_string_pretty(&session)?);
        }
        ServerMessage::Terminated { session_id } => {
            println!("Terminated session: {session_id}");
        }
        ServerMessage::Output { data, .. } => {
            print!("{data}");
        }
        ServerMessage::Error { message, code, .. } => {
            match code {
                Some(code) => eprintln!("Error ({code}): {message}"),
                None => eprintln!("Error: {message}"),
            }
            process::exit(1);
        }
        other => {
            println!("{}", serde_json::to_string_pretty(&other)?);
        }
    }

    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
