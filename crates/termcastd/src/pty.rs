//! PTY bridge: owns one pseudo-terminal and one child process per session.
//!
//! Each spawned session gets three dedicated OS threads, since PTY I/O and
//! child waits are blocking:
//! - a reader thread (PTY master -> manager, one `PtyOutput` per read)
//! - a writer thread (serialized input channel -> PTY master)
//! - an exit waiter (blocks on child exit, reports `PtyExited`)
//!
//! Everything above the `PtyController` trait is PTY-implementation agnostic;
//! the only implementation here rides on portable-pty.

use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use termcast_core::{SessionError, SessionId, SessionResult, SignalKind};

use crate::manager::ManagerCommand;

/// Everything needed to spawn one mirrored process.
#[derive(Debug, Clone)]
pub struct PtySpawnSpec {
    pub session_id: SessionId,
    /// Session incarnation; stamped onto every event the bridge threads
    /// report so stale threads can never touch a respawned session.
    pub epoch: u64,
    /// Argument vector; first element is the executable.
    pub command: Vec<String>,
    pub cwd: PathBuf,
    pub rows: u16,
    pub cols: u16,
    pub read_chunk_bytes: usize,
}

/// Control surface over a live PTY, independent of the backing implementation.
pub trait PtyController: Send {
    /// OS process id of the child, if known.
    fn pid(&self) -> Option<u32>;

    /// Updates the PTY window size.
    fn resize(&self, rows: u16, cols: u16) -> anyhow::Result<()>;

    /// Delivers a signal to the child's process group.
    fn signal(&self, signal: SignalKind) -> SessionResult<()>;
}

/// A successfully spawned PTY session, handed back to the manager.
pub struct PtySession {
    pub pid: Option<u32>,
    pub controller: Box<dyn PtyController>,
    /// In-order input queue drained by the writer thread. Dropping this
    /// sender stops the writer.
    pub input_tx: mpsc::UnboundedSender<Vec<u8>>,
}

/// Allocates a PTY, spawns the command under it, and starts the I/O threads.
///
/// Blocking; call from a blocking task. The reader and exit-waiter threads
/// report into `events` and stop on their own once the PTY closes.
pub fn spawn(spec: PtySpawnSpec, events: mpsc::Sender<ManagerCommand>) -> SessionResult<PtySession> {
    let program = spec
        .command
        .first()
        .cloned()
        .ok_or_else(|| SessionError::spawn("empty command"))?;

    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: spec.rows,
            cols: spec.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(SessionError::spawn)?;

    let mut command = CommandBuilder::new(program);
    for arg in spec.command.iter().skip(1) {
        command.arg(arg);
    }
    command.cwd(&spec.cwd);
    command.env("TERM", "xterm-256color");
    command.env("TERMCAST_SESSION_ID", spec.session_id.as_str());

    let child = pair.slave.spawn_command(command).map_err(SessionError::spawn)?;
    drop(pair.slave);

    let reader = match pair.master.try_clone_reader() {
        Ok(reader) => reader,
        Err(e) => {
            reap(child);
            return Err(SessionError::spawn(e));
        }
    };

    let writer = match pair.master.take_writer() {
        Ok(writer) => writer,
        Err(e) => {
            reap(child);
            return Err(SessionError::spawn(e));
        }
    };

    let pid = child.process_id();
    let (input_tx, input_rx) = mpsc::unbounded_channel();

    spawn_reader_thread(
        spec.session_id.clone(),
        spec.epoch,
        reader,
        events.clone(),
        spec.read_chunk_bytes,
    );
    spawn_writer_thread(writer, input_rx);
    spawn_exit_waiter(spec.session_id, spec.epoch, child, events);

    Ok(PtySession {
        pid,
        controller: Box::new(NativePtyController {
            master: pair.master,
            pid,
        }),
        input_tx,
    })
}

/// Kills and reaps a child whose setup failed partway.
fn reap(mut child: Box<dyn Child + Send + Sync>) {
    let _ = child.kill();
    let _ = child.wait();
}

fn spawn_reader_thread(
    session_id: SessionId,
    epoch: u64,
    mut reader: Box<dyn Read + Send>,
    events: mpsc::Sender<ManagerCommand>,
    chunk_bytes: usize,
) {
    std::thread::spawn(move || {
        let mut buffer = vec![0u8; chunk_bytes.max(1)];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = buffer.get(..n).map(<[u8]>::to_vec).unwrap_or_default();
                    if events
                        .blocking_send(ManagerCommand::PtyOutput {
                            session_id: session_id.clone(),
                            epoch,
                            chunk,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                // EIO here is the normal close path once the child exits.
                Err(_) => break,
            }
        }
        debug!(session_id = %session_id, "PTY reader finished");
    });
}

fn spawn_writer_thread(
    mut writer: Box<dyn Write + Send>,
    mut input_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    std::thread::spawn(move || {
        while let Some(input) = input_rx.blocking_recv() {
            if input.is_empty() {
                continue;
            }
            if writer.write_all(&input).is_err() {
                break;
            }
            if writer.flush().is_err() {
                break;
            }
        }
    });
}

fn spawn_exit_waiter(
    session_id: SessionId,
    epoch: u64,
    mut child: Box<dyn Child + Send + Sync>,
    events: mpsc::Sender<ManagerCommand>,
) {
    std::thread::spawn(move || {
        let exit_code = match child.wait() {
            Ok(status) => Some(status.exit_code() as i32),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Child wait failed");
                None
            }
        };
        let _ = events.blocking_send(ManagerCommand::PtyExited {
            session_id,
            epoch,
            exit_code,
        });
    });
}

/// portable-pty-backed controller.
struct NativePtyController {
    /// Keeps the master side of the PTY alive; dropped when the session
    /// reaches a terminal state, which closes the fd.
    master: Box<dyn MasterPty + Send>,
    pid: Option<u32>,
}

impl PtyController for NativePtyController {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn resize(&self, rows: u16, cols: u16) -> anyhow::Result<()> {
        self.master.resize(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })
    }

    fn signal(&self, signal: SignalKind) -> SessionResult<()> {
        deliver_signal(self.pid, signal)
    }
}

/// Sends `signal` to the process group led by `pid`.
///
/// The PTY spawn puts the child in its own session (setsid), so the negative
/// pid addresses the whole group. A vanished group maps to `NoSuchProcess`,
/// which callers treat as a benign race with natural exit.
#[cfg(unix)]
pub fn deliver_signal(pid: Option<u32>, signal: SignalKind) -> SessionResult<()> {
    let Some(pid) = pid else {
        return Err(SessionError::NoSuchProcess { pid: 0 });
    };

    let signo = match signal {
        SignalKind::Sigint => libc::SIGINT,
        SignalKind::Sigterm => libc::SIGTERM,
        SignalKind::Sigkill => libc::SIGKILL,
    };

    let rc = unsafe { libc::kill(-(pid as i32), signo) };
    if rc == 0 {
        return Ok(());
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Err(SessionError::NoSuchProcess { pid })
    } else {
        Err(SessionError::io(err))
    }
}

#[cfg(not(unix))]
pub fn deliver_signal(_pid: Option<u32>, _signal: SignalKind) -> SessionResult<()> {
    Err(SessionError::io("signals are not supported on this platform"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_without_pid_is_no_such_process() {
        let result = deliver_signal(None, SignalKind::Sigterm);
        assert!(matches!(
            result,
            Err(SessionError::NoSuchProcess { pid: 0 })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn signal_to_reaped_child_is_no_such_process() {
        let mut child = std::process::Command::new("true")
            .spawn()
            .expect("spawn child");
        let pid = child.id();
        child.wait().expect("wait child");

        // The pid is reaped; its process group is gone.
        let result = deliver_signal(Some(pid), SignalKind::Sigterm);
        assert!(matches!(result, Err(SessionError::NoSuchProcess { .. })));
    }

    #[test]
    fn spawn_rejects_empty_command() {
        let (tx, _rx) = mpsc::channel(1);
        let spec = PtySpawnSpec {
            session_id: SessionId::new("empty-cmd"),
            epoch: 0,
            command: Vec::new(),
            cwd: PathBuf::from("/"),
            rows: 24,
            cols: 80,
            read_chunk_bytes: 4096,
        };
        assert!(matches!(
            spawn(spec, tx),
            Err(SessionError::SpawnError { .. })
        ));
    }
}
