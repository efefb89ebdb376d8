//! Session manager commands and replies.
//!
//! Commands come from three directions:
//! - callers (protocol layer or in-process API), carrying a oneshot reply
//! - the PTY bridge threads (`PtyOutput` / `PtyExited`)
//! - the daemon itself (`Sweep` from the lifecycle task, deferred
//!   `SpawnFinished` / `FinishTerminate`)

use std::path::PathBuf;

use tokio::sync::oneshot;

use termcast_core::{SessionError, SessionId, SessionRecord, SignalKind};

use crate::hub::Subscription;
use crate::pty::PtySession;

/// Reply to a successful subscribe.
///
/// The snapshot and the subscription are captured in the same actor turn, so
/// no chunk produced after the snapshot is missing from the subscription and
/// no snapshot chunk is re-delivered.
#[derive(Debug)]
pub struct SubscribeReply {
    /// Current scrollback contents.
    pub snapshot: Vec<u8>,

    /// Live stream of everything after the snapshot.
    pub subscription: Subscription,
}

/// Commands processed by the session manager actor.
pub enum ManagerCommand {
    /// Spawn a command under a fresh PTY and register the session.
    Spawn {
        session_id: SessionId,
        command: Vec<String>,
        cwd: Option<PathBuf>,
        respond_to: oneshot::Sender<Result<SessionRecord, SessionError>>,
    },

    /// Internal: blocking PTY spawn finished; install the result and answer
    /// the original caller.
    SpawnFinished {
        session_id: SessionId,
        result: Result<PtySession, SessionError>,
        respond_to: oneshot::Sender<Result<SessionRecord, SessionError>>,
    },

    /// Capture a scrollback snapshot and register a subscriber.
    Subscribe {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<SubscribeReply, SessionError>>,
    },

    /// Write input bytes to the session's PTY, serialized per session.
    Input {
        session_id: SessionId,
        data: Vec<u8>,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Deliver a signal to the session's process group.
    Signal {
        session_id: SessionId,
        signal: SignalKind,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Update the PTY window size. Best-effort, never fatal.
    Resize {
        session_id: SessionId,
        rows: u16,
        cols: u16,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// SIGTERM now, SIGKILL after the grace period, then force `Terminated`.
    Terminate {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Internal: grace period elapsed; escalate and force the terminal state.
    ///
    /// Carries the session incarnation so a deferred escalation can never
    /// hit a later session respawned under the same id.
    FinishTerminate { session_id: SessionId, epoch: u64 },

    /// Snapshot of all session records.
    List {
        respond_to: oneshot::Sender<Vec<SessionRecord>>,
    },

    /// Single session record lookup.
    Get {
        session_id: SessionId,
        respond_to: oneshot::Sender<Option<SessionRecord>>,
    },

    /// Read the tail of the session's durable log.
    History {
        session_id: SessionId,
        lines: Option<usize>,
        respond_to: oneshot::Sender<Result<Vec<u8>, SessionError>>,
    },

    /// Internal: one chunk read from a session's PTY.
    PtyOutput {
        session_id: SessionId,
        epoch: u64,
        chunk: Vec<u8>,
    },

    /// Internal: a session's child process exited.
    PtyExited {
        session_id: SessionId,
        epoch: u64,
        exit_code: Option<i32>,
    },

    /// Internal: periodic lifecycle sweep (stuck detection, reaping,
    /// retention cleanup).
    Sweep,
}
