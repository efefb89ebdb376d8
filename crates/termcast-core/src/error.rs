//! Session error taxonomy following panic-free policy.

use crate::session::{SessionId, SessionState};
use thiserror::Error;

/// Errors that can occur in session lifecycle and control operations.
///
/// All variants are recoverable from the caller's perspective: they are
/// reported to the requester and never tear down the connection or affect
/// other sessions.
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// Spawn requested for an id that already has a live session.
    #[error("session already exists: {session_id}")]
    DuplicateSession { session_id: SessionId },

    /// Operation on an unknown or already-removed session id.
    #[error("no such session: {session_id}")]
    NoSuchSession { session_id: SessionId },

    /// Input/signal/resize on a session that is not currently running
    /// (terminal state, or still spawning).
    #[error("session {session_id} is not running (state: {state})")]
    SessionNotRunning {
        session_id: SessionId,
        state: SessionState,
    },

    /// PTY allocation or exec failure; wraps the OS error detail.
    #[error("spawn failed: {reason}")]
    SpawnError { reason: String },

    /// Signal raced against natural process exit. Benign - callers should
    /// treat this as a no-op.
    #[error("no such process (pid {pid})")]
    NoSuchProcess { pid: u32 },

    /// The session manager has shut down.
    #[error("session manager channel closed")]
    ChannelClosed,

    /// Miscellaneous I/O failure (log reads, record persistence).
    #[error("I/O error: {0}")]
    Io(String),
}

impl SessionError {
    /// Creates a spawn error from any displayable cause.
    pub fn spawn<E: std::fmt::Display>(err: E) -> Self {
        Self::SpawnError {
            reason: err.to_string(),
        }
    }

    /// Creates an I/O error from any displayable cause.
    pub fn io<E: std::fmt::Display>(err: E) -> Self {
        Self::Io(err.to_string())
    }

    /// Stable machine-readable code for the wire protocol.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateSession { .. } => "duplicate_session",
            Self::NoSuchSession { .. } => "no_such_session",
            Self::SessionNotRunning { .. } => "session_not_running",
            Self::SpawnError { .. } => "spawn_error",
            Self::NoSuchProcess { .. } => "no_such_process",
            Self::ChannelClosed => "internal",
            Self::Io(_) => "internal",
        }
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
