//! Protocol message types for daemon communication.
//!
//! Every message is a JSON object with a `type` discriminator. Requests that
//! target a session carry its `session_id`. One JSON message per line.

use crate::version::ProtocolVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use termcast_core::{SessionId, SessionRecord, SignalKind};

/// Request types that can be sent by clients to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Spawn a command under a fresh PTY and register the session.
    Spawn {
        session_id: SessionId,
        /// Argument vector; the first element is the executable.
        command: Vec<String>,
        /// Child working directory; defaults to the daemon's cwd.
        #[serde(skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
    },

    /// Subscribe to a session's live output.
    ///
    /// Replies with `buffer` (scrollback snapshot) then `subscribed`, after
    /// which `output` messages stream until unsubscribe or termination.
    Subscribe { session_id: SessionId },

    /// Stop receiving output for a session. Idempotent.
    Unsubscribe { session_id: SessionId },

    /// Write keyboard input to the session's PTY.
    Input { session_id: SessionId, data: String },

    /// Deliver a signal to the session's process group.
    Signal {
        session_id: SessionId,
        signal: SignalKind,
    },

    /// Update the PTY window size.
    Resize {
        session_id: SessionId,
        rows: u16,
        cols: u16,
    },

    /// Terminate the session: SIGTERM, grace period, SIGKILL.
    Terminate { session_id: SessionId },

    /// Request a snapshot of all session records.
    List,

    /// Read the tail of the session's durable log.
    History {
        session_id: SessionId,
        /// Maximum lines to return (default 1000).
        #[serde(skip_serializing_if = "Option::is_none")]
        lines: Option<usize>,
    },

    /// Liveness check.
    Ping { seq: u64 },
}

impl Request {
    /// Wire name of this request type, used in error replies (`in_reply_to`).
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Input { .. } => "input",
            Self::Signal { .. } => "signal",
            Self::Resize { .. } => "resize",
            Self::Terminate { .. } => "terminate",
            Self::List => "list",
            Self::History { .. } => "history",
            Self::Ping { .. } => "ping",
        }
    }
}

/// Envelope for client requests.
///
/// The protocol version may be omitted, in which case the current version is
/// assumed; an incompatible major version yields a typed `error` reply, never
/// a disconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRequest {
    /// Protocol version the client speaks.
    #[serde(default)]
    pub protocol_version: ProtocolVersion,

    /// Request payload.
    #[serde(flatten)]
    pub request: Request,
}

impl ClientRequest {
    /// Creates a request with the current protocol version.
    pub fn new(request: Request) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            request,
        }
    }

    /// Creates a spawn request.
    pub fn spawn(session_id: SessionId, command: Vec<String>, cwd: Option<PathBuf>) -> Self {
        Self::new(Request::Spawn {
            session_id,
            command,
            cwd,
        })
    }

    /// Creates a subscribe request.
    pub fn subscribe(session_id: SessionId) -> Self {
        Self::new(Request::Subscribe { session_id })
    }

    /// Creates an unsubscribe request.
    pub fn unsubscribe(session_id: SessionId) -> Self {
        Self::new(Request::Unsubscribe { session_id })
    }

    /// Creates an input request.
    pub fn input(session_id: SessionId, data: impl Into<String>) -> Self {
        Self::new(Request::Input {
            session_id,
            data: data.into(),
        })
    }

    /// Creates a signal request.
    pub fn signal(session_id: SessionId, signal: SignalKind) -> Self {
        Self::new(Request::Signal { session_id, signal })
    }

    /// Creates a resize request.
    pub fn resize(session_id: SessionId, rows: u16, cols: u16) -> Self {
        Self::new(Request::Resize {
            session_id,
            rows,
            cols,
        })
    }

    /// Creates a terminate request.
    pub fn terminate(session_id: SessionId) -> Self {
        Self::new(Request::Terminate { session_id })
    }

    /// Creates a list request.
    pub fn list() -> Self {
        Self::new(Request::List)
    }

    /// Creates a history request.
    pub fn history(session_id: SessionId, lines: Option<usize>) -> Self {
        Self::new(Request::History { session_id, lines })
    }

    /// Creates a ping request.
    pub fn ping(seq: u64) -> Self {
        Self::new(Request::Ping { seq })
    }
}

/// Messages pushed or replied by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A live output chunk from the session's PTY.
    Output {
        session_id: SessionId,
        data: String,
        timestamp: DateTime<Utc>,
    },

    /// Scrollback snapshot, sent once immediately after subscribing.
    Buffer { session_id: SessionId, data: String },

    /// Subscription acknowledged; `output` messages follow.
    Subscribed { session_id: SessionId },

    /// The session reached a terminal state (or terminate was requested).
    Terminated { session_id: SessionId },

    /// Reply to `spawn` with the freshly registered record.
    Spawned { session: Box<SessionRecord> },

    /// Reply to `list`: snapshot of all session records.
    Sessions { sessions: Vec<SessionRecord> },

    /// Pong reply to ping.
    Pong { seq: u64 },

    /// Typed failure referencing the originating request.
    Error {
        message: String,
        /// Request type that triggered this error.
        #[serde(skip_serializing_if = "Option::is_none")]
        in_reply_to: Option<String>,
        /// Stable machine-readable code.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl ServerMessage {
    /// Creates an output message stamped `now`.
    pub fn output(session_id: SessionId, data: impl Into<String>) -> Self {
        Self::Output {
            session_id,
            data: data.into(),
            timestamp: Utc::now(),
        }
    }

    /// Creates a buffer (scrollback snapshot) message.
    pub fn buffer(session_id: SessionId, data: impl Into<String>) -> Self {
        Self::Buffer {
            session_id,
            data: data.into(),
        }
    }

    /// Creates a subscribed acknowledgment.
    pub fn subscribed(session_id: SessionId) -> Self {
        Self::Subscribed { session_id }
    }

    /// Creates a terminated notification.
    pub fn terminated(session_id: SessionId) -> Self {
        Self::Terminated { session_id }
    }

    /// Creates a spawned reply.
    pub fn spawned(session: SessionRecord) -> Self {
        Self::Spawned {
            session: Box::new(session),
        }
    }

    /// Creates a session list reply.
    pub fn sessions(sessions: Vec<SessionRecord>) -> Self {
        Self::Sessions { sessions }
    }

    /// Creates a pong reply.
    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    /// Creates an error reply.
    pub fn error(message: &str, in_reply_to: Option<&str>, code: Option<&str>) -> Self {
        Self::Error {
            message: message.to_string(),
            in_reply_to: in_reply_to.map(str::to_string),
            code: code.map(str::to_string),
        }
    }
}
