//! Session domain entities and value objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Unique identifier for a mirrored terminal session.
///
/// Opaque, caller-supplied string (e.g. "worker-42" or a UUID). The id is
/// also used to name the session's record and log files on disk, so callers
/// should keep it filesystem-friendly; `is_storage_safe` is checked at spawn.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a new SessionId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened display form (first 8 characters).
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }

    /// Whether this id can safely name files inside the session store.
    ///
    /// Rejects empty ids and anything that could escape the store directory.
    #[must_use]
    pub fn is_storage_safe(&self) -> bool {
        !self.0.is_empty()
            && self.0 != "."
            && self.0 != ".."
            && !self.0.contains('/')
            && !self.0.contains('\\')
            && !self.0.contains('\0')
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Session Lifecycle State
// ============================================================================

/// Lifecycle state of a session.
///
/// Transitions form a fixed graph (see `can_transition_to`):
///
/// ```text
/// Pending ──▶ Spawning ──▶ Running ◀──▶ Stuck
///                │           │            │
///                ▼           ▼            ▼
///              Failed   Completed/Failed/Terminated
/// ```
///
/// `Completed`, `Failed`, and `Terminated` are absorbing: once reached, the
/// session's PTY and buffers are released and only its on-disk log remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Spawn request accepted, nothing allocated yet.
    Pending,

    /// PTY allocation and process start in flight.
    Spawning,

    /// Child process is alive and the PTY is being mirrored.
    Running,

    /// Running, but no output or control activity for the stuck threshold.
    /// Advisory only - the session keeps running and recovers on activity.
    Stuck,

    /// Child exited with status 0.
    Completed,

    /// Child exited non-zero, or the PTY failed mid-stream.
    Failed,

    /// Explicitly terminated via a terminate request.
    Terminated,
}

impl SessionState {
    /// Returns true if this is an absorbing terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Terminated)
    }

    /// Returns true if the child process is (believed to be) alive.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Running | Self::Stuck)
    }

    /// Returns true if the `from -> to` edge exists in the lifecycle graph.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Pending, Spawning) => true,
            (Spawning, Running | Failed) => true,
            (Running, Stuck | Completed | Failed | Terminated) => true,
            (Stuck, Running | Completed | Failed | Terminated) => true,
            _ => false,
        }
    }

    /// Returns the display label for this state.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Spawning => "spawning",
            Self::Running => "running",
            Self::Stuck => "stuck",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ============================================================================
// Signals
// ============================================================================

/// Signals that can be forwarded to a session's process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalKind {
    Sigint,
    Sigterm,
    Sigkill,
}

impl SignalKind {
    /// Returns the conventional signal name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sigint => "SIGINT",
            Self::Sigterm => "SIGTERM",
            Self::Sigkill => "SIGKILL",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Session Record
// ============================================================================

/// Durable metadata for one session.
///
/// Persisted as `<store>/<session_id>.json` for external inspection and
/// mutated only through the session manager's lifecycle operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Caller-supplied unique key.
    pub session_id: SessionId,

    /// Current lifecycle state.
    pub state: SessionState,

    /// Argument vector executed under the PTY.
    pub command: Vec<String>,

    /// Absolute path used as the child's working directory.
    pub working_directory: PathBuf,

    /// OS process id, set once spawning completes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// When the spawn request was accepted.
    pub created_at: DateTime<Utc>,

    /// Updated on every PTY read and every control message processed.
    pub last_activity_at: DateTime<Utc>,

    /// Child exit status; set only on `Completed`/`Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl SessionRecord {
    /// Creates a fresh record in `Pending` state.
    pub fn new(
        session_id: SessionId,
        command: Vec<String>,
        working_directory: PathBuf,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            state: SessionState::Pending,
            command,
            working_directory,
            pid: None,
            created_at: now,
            last_activity_at: now,
            exit_code: None,
        }
    }

    /// Marks control/output activity at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = now;
    }

    /// Seconds since the last recorded activity.
    #[must_use]
    pub fn idle_seconds(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.last_activity_at).num_seconds()
    }

    /// Milliseconds since the last recorded activity.
    #[must_use]
    pub fn idle_millis(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.last_activity_at)
            .num_milliseconds()
    }
}
