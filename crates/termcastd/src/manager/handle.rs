//! Caller-facing interface to the session manager.
//!
//! `ManagerHandle` is the in-process control API: the transport layer
//! dispatches protocol requests through it, and an embedding orchestrator can
//! call it directly without a network hop. Cheap to clone; all methods talk
//! to the manager actor over channels.

use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};

use termcast_core::{SessionError, SessionId, SessionRecord, SessionResult, SignalKind};

use super::commands::{ManagerCommand, SubscribeReply};

/// Handle for interacting with the session manager actor.
#[derive(Clone)]
pub struct ManagerHandle {
    sender: mpsc::Sender<ManagerCommand>,
}

impl ManagerHandle {
    pub fn new(sender: mpsc::Sender<ManagerCommand>) -> Self {
        Self { sender }
    }

    /// Spawns `command` under a fresh PTY, registered as `session_id`.
    ///
    /// Resolves once the child is confirmed started (record in `Running`).
    ///
    /// # Errors
    ///
    /// - `SessionError::DuplicateSession` if the id has a live session
    /// - `SessionError::SpawnError` on PTY allocation or exec failure
    /// - `SessionError::ChannelClosed` if the manager has shut down
    pub async fn spawn(
        &self,
        session_id: SessionId,
        command: Vec<String>,
        cwd: Option<PathBuf>,
    ) -> SessionResult<SessionRecord> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ManagerCommand::Spawn {
                session_id,
                command,
                cwd,
                respond_to: tx,
            })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    /// Subscribes to a session's output stream.
    ///
    /// The reply carries the scrollback snapshot plus a live subscription
    /// that observes exactly the chunks produced after the snapshot.
    /// Unsubscribing is dropping the subscription.
    pub async fn subscribe(&self, session_id: SessionId) -> SessionResult<SubscribeReply> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ManagerCommand::Subscribe {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    /// Writes input bytes to the session's PTY.
    ///
    /// Writes from concurrent callers are serialized in submission order and
    /// never interleave at the byte level.
    pub async fn write_input(&self, session_id: SessionId, data: Vec<u8>) -> SessionResult<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ManagerCommand::Input {
                session_id,
                data,
                respond_to: tx,
            })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    /// Delivers a signal to the session's process group.
    ///
    /// `SessionError::NoSuchProcess` means the process exited first; callers
    /// should treat it as a no-op.
    pub async fn signal(&self, session_id: SessionId, signal: SignalKind) -> SessionResult<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ManagerCommand::Signal {
                session_id,
                signal,
                respond_to: tx,
            })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    /// Updates the PTY window size. Best-effort; never fails for an
    /// unsupported platform.
    pub async fn resize(&self, session_id: SessionId, rows: u16, cols: u16) -> SessionResult<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ManagerCommand::Resize {
                session_id,
                rows,
                cols,
                respond_to: tx,
            })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    /// Terminates the session: SIGTERM, grace period, SIGKILL, forced
    /// `Terminated` state. Idempotent on already-terminal sessions.
    pub async fn terminate(&self, session_id: SessionId) -> SessionResult<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ManagerCommand::Terminate {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    /// Snapshot of all session records, oldest first.
    ///
    /// Returns an empty vector if the manager is gone.
    pub async fn list(&self) -> Vec<SessionRecord> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(ManagerCommand::List { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Looks up one session record.
    pub async fn get(&self, session_id: SessionId) -> Option<SessionRecord> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ManagerCommand::Get {
                session_id,
                respond_to: tx,
            })
            .await
            .ok()?;
        rx.await.ok()?
    }

    /// Reads the tail of the session's durable log (`lines` lines, default
    /// from config). Works for live, terminal, and cleaned-up sessions whose
    /// log file remains.
    pub async fn history(
        &self,
        session_id: SessionId,
        lines: Option<usize>,
    ) -> SessionResult<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ManagerCommand::History {
                session_id,
                lines,
                respond_to: tx,
            })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    /// Whether the manager actor is still accepting commands.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_handle() -> (ManagerHandle, mpsc::Receiver<ManagerCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        (ManagerHandle::new(cmd_tx), cmd_rx)
    }

    #[tokio::test]
    async fn handle_is_clone() {
        let (handle, _rx) = create_test_handle();
        let _cloned = handle.clone();
    }

    #[tokio::test]
    async fn spawn_sends_command() {
        let (handle, mut rx) = create_test_handle();

        let responder = tokio::spawn(async move {
            match rx.recv().await {
                Some(ManagerCommand::Spawn {
                    session_id,
                    command,
                    respond_to,
                    ..
                }) => {
                    assert_eq!(session_id.as_str(), "job-1");
                    assert_eq!(command, vec!["true".to_string()]);
                    let _ = respond_to.send(Err(SessionError::spawn("test stub")));
                    true
                }
                _ => false,
            }
        });

        let result = handle
            .spawn(SessionId::new("job-1"), vec!["true".to_string()], None)
            .await;
        assert!(matches!(result, Err(SessionError::SpawnError { .. })));
        assert!(responder.await.unwrap());
    }

    #[tokio::test]
    async fn closed_channel_maps_to_channel_closed() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        let result = handle
            .spawn(SessionId::new("job-2"), vec!["true".to_string()], None)
            .await;
        assert!(matches!(result, Err(SessionError::ChannelClosed)));

        let result = handle.write_input(SessionId::new("job-2"), b"x".to_vec()).await;
        assert!(matches!(result, Err(SessionError::ChannelClosed)));
    }

    #[tokio::test]
    async fn list_returns_empty_on_closed_channel() {
        let (handle, rx) = create_test_handle();
        drop(rx);
        assert!(handle.list().await.is_empty());
    }

    #[tokio::test]
    async fn get_returns_none_on_closed_channel() {
        let (handle, rx) = create_test_handle();
        drop(rx);
        assert!(handle.get(SessionId::new("job-3")).await.is_none());
    }

    #[tokio::test]
    async fn terminate_roundtrip() {
        let (handle, mut rx) = create_test_handle();

        let responder = tokio::spawn(async move {
            if let Some(ManagerCommand::Terminate { respond_to, .. }) = rx.recv().await {
                let _ = respond_to.send(Ok(()));
                return true;
            }
            false
        });

        assert!(handle.terminate(SessionId::new("job-4")).await.is_ok());
        assert!(responder.await.unwrap());
    }
}
