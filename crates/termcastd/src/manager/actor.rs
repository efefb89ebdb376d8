//! Session manager actor - owns all session state and processes commands.
//!
//! The actor is the single owner of every session's record, scrollback,
//! fan-out hub, PTY handles, and log file. It receives commands via an mpsc
//! channel and processes them sequentially, which is what makes the paired
//! scrollback/log appends and the snapshot-then-subscribe handoff atomic
//! without any locks.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel send failures are logged but don't panic

use std::collections::HashMap;
use std::fs::File;
use std::io::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use termcast_core::{
    ScrollbackBuffer, SessionError, SessionId, SessionRecord, SessionState,
};

use crate::config::Config;
use crate::hub::FanoutHub;
use crate::lifecycle::ProcessWatcher;
use crate::pty::{self, PtySession, PtySpawnSpec};
use crate::store::RecordStore;

use super::commands::{ManagerCommand, SubscribeReply};

// ============================================================================
// Resource Limits
// ============================================================================

/// Maximum number of sessions (live or retained) the manager tracks.
pub const MAX_SESSIONS: usize = 100;

/// How long a live session's pid must be gone (with no activity) before the
/// sweep reaps it behind the exit waiter's back.
const REAP_GRACE_MILLIS: i64 = 5_000;

// ============================================================================
// Per-Session State
// ============================================================================

/// Everything the manager owns for one session.
///
/// The optional fields are populated while the session is live and dropped
/// at the terminal transition, which is exactly the resource-release point:
/// dropping `pty` closes the master fd and stops the writer thread, dropping
/// `hub` ends every subscription, dropping `log` (at retention cleanup)
/// closes the file handle.
struct Session {
    record: SessionRecord,
    /// Incarnation counter: PTY bridge events and deferred terminate
    /// escalations carry the epoch they were issued for, so stale ones can
    /// never touch a session respawned under the same id.
    epoch: u64,
    scrollback: Option<ScrollbackBuffer>,
    hub: Option<FanoutHub>,
    pty: Option<PtySession>,
    log: Option<File>,
    terminate_requested: bool,
    terminal_at: Option<DateTime<Utc>>,
    /// Exit report that arrived while the session was still `Spawning` (a
    /// very fast child can beat the spawn-finished handoff); replayed once
    /// the session reaches `Running`.
    pending_exit: Option<Option<i32>>,
}

// ============================================================================
// Session Manager Actor
// ============================================================================

/// The session manager actor.
pub struct SessionManager {
    /// Command receiver.
    receiver: mpsc::Receiver<ManagerCommand>,

    /// Sender for deferred self-commands (spawn completion, terminate
    /// escalation) and for the PTY bridge threads.
    internal_tx: mpsc::Sender<ManagerCommand>,

    sessions: HashMap<SessionId, Session>,
    store: RecordStore,
    config: Config,
    watcher: ProcessWatcher,
    next_epoch: u64,
}

impl SessionManager {
    pub fn new(
        receiver: mpsc::Receiver<ManagerCommand>,
        internal_tx: mpsc::Sender<ManagerCommand>,
        store: RecordStore,
        config: Config,
    ) -> Self {
        Self {
            receiver,
            internal_tx,
            sessions: HashMap::new(),
            store,
            config,
            watcher: ProcessWatcher::new(),
            next_epoch: 0,
        }
    }

    /// Runs the actor event loop until every external sender is gone.
    pub async fn run(mut self) {
        info!(store = %self.store.dir().display(), "Session manager starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(sessions = self.sessions.len(), "Session manager stopped");
    }

    fn handle_command(&mut self, cmd: ManagerCommand) {
        match cmd {
            ManagerCommand::Spawn {
                session_id,
                command,
                cwd,
                respond_to,
            } => self.handle_spawn(session_id, command, cwd, respond_to),
            ManagerCommand::SpawnFinished {
                session_id,
                result,
                respond_to,
            } => self.handle_spawn_finished(session_id, result, respond_to),
            ManagerCommand::Subscribe {
                session_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_subscribe(&session_id));
            }
            ManagerCommand::Input {
                session_id,
                data,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_input(&session_id, data));
            }
            ManagerCommand::Signal {
                session_id,
                signal,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_signal(&session_id, signal));
            }
            ManagerCommand::Resize {
                session_id,
                rows,
                cols,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_resize(&session_id, rows, cols));
            }
            ManagerCommand::Terminate {
                session_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_terminate(&session_id));
            }
            ManagerCommand::FinishTerminate { session_id, epoch } => {
                self.handle_finish_terminate(&session_id, epoch);
            }
            ManagerCommand::List { respond_to } => {
                let _ = respond_to.send(self.handle_list());
            }
            ManagerCommand::Get {
                session_id,
                respond_to,
            } => {
                let record = self.sessions.get(&session_id).map(|s| s.record.clone());
                let _ = respond_to.send(record);
            }
            ManagerCommand::History {
                session_id,
                lines,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_history(&session_id, lines));
            }
            ManagerCommand::PtyOutput {
                session_id,
                epoch,
                chunk,
            } => {
                self.handle_pty_output(&session_id, epoch, chunk);
            }
            ManagerCommand::PtyExited {
                session_id,
                epoch,
                exit_code,
            } => self.handle_pty_exited(&session_id, epoch, exit_code),
            ManagerCommand::Sweep => self.handle_sweep(),
        }
    }

    // ========================================================================
    // Spawn
    // ========================================================================

    fn handle_spawn(
        &mut self,
        session_id: SessionId,
        command: Vec<String>,
        cwd: Option<PathBuf>,
        respond_to: tokio::sync::oneshot::Sender<Result<SessionRecord, SessionError>>,
    ) {
        if !session_id.is_storage_safe() {
            let _ = respond_to.send(Err(SessionError::spawn(
                "session id must be a plain file name",
            )));
            return;
        }
        if command.is_empty() {
            let _ = respond_to.send(Err(SessionError::spawn("empty command")));
            return;
        }

        if let Some(existing) = self.sessions.get(&session_id) {
            if !existing.record.state.is_terminal() {
                let _ = respond_to.send(Err(SessionError::DuplicateSession {
                    session_id: session_id.clone(),
                }));
                return;
            }
            // Terminal record retained for inspection: a respawn replaces it.
            self.cleanup_session(&session_id);
        }

        if self.sessions.len() >= MAX_SESSIONS {
            warn!(
                session_id = %session_id,
                max = MAX_SESSIONS,
                "Session table is full, rejecting spawn"
            );
            let _ = respond_to.send(Err(SessionError::spawn(format!(
                "session table is full (max: {MAX_SESSIONS})"
            ))));
            return;
        }

        let now = Utc::now();
        let cwd = cwd.unwrap_or_else(|| {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"))
        });

        let log = match self.store.create_log(&session_id) {
            Ok(log) => log,
            Err(e) => {
                let _ = respond_to.send(Err(SessionError::spawn(e)));
                return;
            }
        };

        let mut record = SessionRecord::new(session_id.clone(), command.clone(), cwd.clone(), now);
        transition(&mut record, SessionState::Spawning);
        if let Err(e) = self.store.persist(&record) {
            warn!(session_id = %session_id, error = %e, "Failed to persist record");
        }

        let epoch = self.next_epoch;
        self.next_epoch += 1;

        self.sessions.insert(
            session_id.clone(),
            Session {
                record,
                epoch,
                scrollback: Some(ScrollbackBuffer::new(self.config.scrollback_bytes)),
                hub: Some(FanoutHub::new(self.config.subscriber_buffer)),
                pty: None,
                log: Some(log),
                terminate_requested: false,
                terminal_at: None,
                pending_exit: None,
            },
        );

        let spec = PtySpawnSpec {
            session_id: session_id.clone(),
            epoch,
            command,
            cwd,
            rows: self.config.default_rows,
            cols: self.config.default_cols,
            read_chunk_bytes: self.config.read_chunk_bytes,
        };
        let events = self.internal_tx.clone();
        let finish_tx = self.internal_tx.clone();

        // The blocking openpty/fork runs off the actor; the reservation above
        // makes a racing duplicate spawn fail deterministically meanwhile.
        tokio::spawn(async move {
            let result = match tokio::task::spawn_blocking(move || pty::spawn(spec, events)).await {
                Ok(result) => result,
                Err(e) => Err(SessionError::spawn(format!("spawn task failed: {e}"))),
            };
            let _ = finish_tx
                .send(ManagerCommand::SpawnFinished {
                    session_id,
                    result,
                    respond_to,
                })
                .await;
        });
    }

    fn handle_spawn_finished(
        &mut self,
        session_id: SessionId,
        result: Result<PtySession, SessionError>,
        respond_to: tokio::sync::oneshot::Sender<Result<SessionRecord, SessionError>>,
    ) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            // Reservation vanished; don't leak a running child.
            if let Ok(pty) = result {
                let _ = pty.controller.signal(termcast_core::SignalKind::Sigkill);
            }
            let _ = respond_to.send(Err(SessionError::NoSuchSession { session_id }));
            return;
        };

        match result {
            Ok(pty) => {
                session.record.pid = pty.pid;
                transition(&mut session.record, SessionState::Running);
                session.pty = Some(pty);
                if let Err(e) = self.store.persist(&session.record) {
                    warn!(session_id = %session_id, error = %e, "Failed to persist record");
                }

                info!(
                    session_id = %session_id,
                    pid = ?session.record.pid,
                    command = ?session.record.command,
                    "Session running"
                );
                let _ = respond_to.send(Ok(session.record.clone()));

                // A very fast child may have exited before this handoff;
                // replay the buffered report now that the session is running.
                let epoch = session.epoch;
                if let Some(exit_code) = session.pending_exit.take() {
                    self.handle_pty_exited(&session_id, epoch, exit_code);
                }
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Spawn failed");
                // A failed spawn is terminal for this attempt only; clear the
                // reservation so the id is immediately reusable.
                self.sessions.remove(&session_id);
                self.store.remove_record(&session_id);
                self.store.remove_log(&session_id);
                let _ = respond_to.send(Err(e));
            }
        }
    }

    // ========================================================================
    // Output & Exit (PTY bridge events)
    // ========================================================================

    fn handle_pty_output(&mut self, session_id: &SessionId, epoch: u64, chunk: Vec<u8>) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        if session.epoch != epoch {
            return;
        }

        // The durable log takes every byte, even trailing output that races
        // past the exit transition.
        if let Some(log) = session.log.as_mut() {
            if let Err(e) = log.write_all(&chunk) {
                warn!(session_id = %session_id, error = %e, "Failed to append to log");
            }
        }

        if session.record.state.is_terminal() {
            return;
        }

        if let Some(scrollback) = session.scrollback.as_mut() {
            scrollback.push(&chunk);
        }

        session.record.touch(Utc::now());
        if session.record.state == SessionState::Stuck {
            transition(&mut session.record, SessionState::Running);
            if let Err(e) = self.store.persist(&session.record) {
                warn!(session_id = %session_id, error = %e, "Failed to persist record");
            }
        }

        if let Some(hub) = &session.hub {
            hub.broadcast(chunk);
        }
    }

    fn handle_pty_exited(&mut self, session_id: &SessionId, epoch: u64, exit_code: Option<i32>) {
        let now = Utc::now();
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        if session.epoch != epoch || session.record.state.is_terminal() {
            return;
        }
        if session.record.state == SessionState::Spawning {
            // Exit beat the spawn handoff; park it until the session is
            // installed as running.
            session.pending_exit = Some(exit_code);
            return;
        }

        let target = if session.terminate_requested {
            SessionState::Terminated
        } else if exit_code == Some(0) {
            SessionState::Completed
        } else {
            SessionState::Failed
        };
        if target != SessionState::Terminated {
            session.record.exit_code = exit_code;
        }

        info!(
            session_id = %session_id,
            exit_code = ?exit_code,
            state = %target,
            "Session exited"
        );

        finish(session, target, now);
        if let Err(e) = self.store.persist(&session.record) {
            warn!(session_id = %session_id, error = %e, "Failed to persist record");
        }
    }

    // ========================================================================
    // Control Operations
    // ========================================================================

    fn handle_input(&mut self, session_id: &SessionId, data: Vec<u8>) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NoSuchSession {
                session_id: session_id.clone(),
            })?;

        let Some(pty) = session.pty.as_ref().filter(|_| session.record.state.is_live()) else {
            return Err(SessionError::SessionNotRunning {
                session_id: session_id.clone(),
                state: session.record.state,
            });
        };

        // The unbounded queue is drained by a single writer thread, so bytes
        // land on the PTY in submission order without interleaving.
        if pty.input_tx.send(data).is_err() {
            return Err(SessionError::SessionNotRunning {
                session_id: session_id.clone(),
                state: session.record.state,
            });
        }

        session.record.touch(Utc::now());
        Ok(())
    }

    fn handle_signal(
        &mut self,
        session_id: &SessionId,
        signal: termcast_core::SignalKind,
    ) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NoSuchSession {
                session_id: session_id.clone(),
            })?;

        let Some(pty) = session.pty.as_ref().filter(|_| session.record.state.is_live()) else {
            return Err(SessionError::SessionNotRunning {
                session_id: session_id.clone(),
                state: session.record.state,
            });
        };

        debug!(session_id = %session_id, signal = %signal, "Delivering signal");
        pty.controller.signal(signal)?;
        session.record.touch(Utc::now());
        Ok(())
    }

    fn handle_resize(
        &mut self,
        session_id: &SessionId,
        rows: u16,
        cols: u16,
    ) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NoSuchSession {
                session_id: session_id.clone(),
            })?;

        let Some(pty) = session.pty.as_ref().filter(|_| session.record.state.is_live()) else {
            return Err(SessionError::SessionNotRunning {
                session_id: session_id.clone(),
                state: session.record.state,
            });
        };

        if rows == 0 || cols == 0 {
            warn!(session_id = %session_id, rows, cols, "Ignoring zero-sized resize");
            return Ok(());
        }

        // Resize is best-effort: unsupported platforms and racing exits are
        // not failures.
        if let Err(e) = pty.controller.resize(rows, cols) {
            warn!(session_id = %session_id, error = %e, "Resize failed, ignoring");
        }
        session.record.touch(Utc::now());
        Ok(())
    }

    fn handle_terminate(&mut self, session_id: &SessionId) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NoSuchSession {
                session_id: session_id.clone(),
            })?;

        // Terminating an already-terminal session is idempotent.
        if session.record.state.is_terminal() {
            return Ok(());
        }
        if !session.record.state.is_live() {
            return Err(SessionError::SessionNotRunning {
                session_id: session_id.clone(),
                state: session.record.state,
            });
        }

        session.terminate_requested = true;
        session.record.touch(Utc::now());

        if let Some(pty) = &session.pty {
            match pty.controller.signal(termcast_core::SignalKind::Sigterm) {
                // Already gone: the exit waiter will finish the transition.
                Ok(()) | Err(SessionError::NoSuchProcess { .. }) => {}
                Err(e) => warn!(session_id = %session_id, error = %e, "SIGTERM failed"),
            }
        }

        info!(
            session_id = %session_id,
            grace = ?self.config.terminate_grace,
            "Terminate requested"
        );

        let tx = self.internal_tx.clone();
        let grace = self.config.terminate_grace;
        let sid = session_id.clone();
        let epoch = session.epoch;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = tx
                .send(ManagerCommand::FinishTerminate {
                    session_id: sid,
                    epoch,
                })
                .await;
        });

        Ok(())
    }

    fn handle_finish_terminate(&mut self, session_id: &SessionId, epoch: u64) {
        let now = Utc::now();
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        if session.epoch != epoch || session.record.state.is_terminal() {
            return;
        }

        warn!(session_id = %session_id, "Grace period expired, escalating to SIGKILL");
        if let Some(pty) = &session.pty {
            let _ = pty.controller.signal(termcast_core::SignalKind::Sigkill);
        }

        // Forced regardless of whether the kill (or the earlier wait) landed,
        // so terminate always reaches a terminal state in bounded time.
        finish(session, SessionState::Terminated, now);
        if let Err(e) = self.store.persist(&session.record) {
            warn!(session_id = %session_id, error = %e, "Failed to persist record");
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    fn handle_subscribe(&mut self, session_id: &SessionId) -> Result<SubscribeReply, SessionError> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NoSuchSession {
                session_id: session_id.clone(),
            })?;

        // Terminal sessions have no live stream to join; their output is
        // still reachable via `history`.
        let Some(hub) = session.hub.as_ref() else {
            return Err(SessionError::NoSuchSession {
                session_id: session_id.clone(),
            });
        };

        let snapshot = session
            .scrollback
            .as_ref()
            .map(ScrollbackBuffer::snapshot)
            .unwrap_or_default();
        let subscription = hub.subscribe();
        session.record.touch(Utc::now());

        debug!(
            session_id = %session_id,
            snapshot_bytes = snapshot.len(),
            subscribers = hub.subscriber_count(),
            "Subscriber joined"
        );

        Ok(SubscribeReply {
            snapshot,
            subscription,
        })
    }

    fn handle_list(&self) -> Vec<SessionRecord> {
        let mut records: Vec<SessionRecord> =
            self.sessions.values().map(|s| s.record.clone()).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    fn handle_history(
        &self,
        session_id: &SessionId,
        lines: Option<usize>,
    ) -> Result<Vec<u8>, SessionError> {
        if !session_id.is_storage_safe() {
            return Err(SessionError::NoSuchSession {
                session_id: session_id.clone(),
            });
        }

        let max_lines = lines.unwrap_or(self.config.history_lines);

        // Served from the log file so it works for live sessions, retained
        // terminal sessions, and cleaned-up sessions whose log remains.
        match self.store.read_log_tail(session_id, max_lines) {
            Ok(Some(data)) => Ok(data),
            Ok(None) if self.sessions.contains_key(session_id) => Ok(Vec::new()),
            Ok(None) => Err(SessionError::NoSuchSession {
                session_id: session_id.clone(),
            }),
            Err(e) => Err(SessionError::io(e)),
        }
    }

    // ========================================================================
    // Lifecycle Sweep
    // ========================================================================

    fn handle_sweep(&mut self) {
        let now = Utc::now();
        let stuck_millis = self.config.stuck_after.as_millis() as i64;
        let retention = self.config.retention;

        let mut reap: Vec<SessionId> = Vec::new();
        let mut expired: Vec<SessionId> = Vec::new();

        for (id, session) in self.sessions.iter_mut() {
            if session.record.state == SessionState::Running
                && session.record.idle_millis(now) >= stuck_millis
            {
                if transition(&mut session.record, SessionState::Stuck) {
                    info!(
                        session_id = %id,
                        idle_secs = session.record.idle_seconds(now),
                        "Session flagged stuck"
                    );
                    if let Err(e) = self.store.persist(&session.record) {
                        warn!(session_id = %id, error = %e, "Failed to persist record");
                    }
                }
            }

            if session.record.state.is_live() {
                // Defensive double-check: the exit waiter reports within
                // milliseconds, so a pid that has been gone for a while means
                // the report was lost.
                if session.record.idle_millis(now) >= REAP_GRACE_MILLIS {
                    if let Some(pid) = session.record.pid {
                        if !self.watcher.is_alive(pid) {
                            reap.push(id.clone());
                        }
                    }
                }
            } else if session.record.state.is_terminal() {
                let expired_now = session
                    .terminal_at
                    .and_then(|t| now.signed_duration_since(t).to_std().ok())
                    .map(|elapsed| elapsed >= retention)
                    .unwrap_or(false);
                if expired_now {
                    expired.push(id.clone());
                }
            }
        }

        for id in reap {
            warn!(session_id = %id, "Child process gone without exit report, reaping");
            if let Some(session) = self.sessions.get_mut(&id) {
                finish(session, SessionState::Failed, now);
                if let Err(e) = self.store.persist(&session.record) {
                    warn!(session_id = %id, error = %e, "Failed to persist record");
                }
            }
        }

        for id in expired {
            debug!(session_id = %id, "Retention expired, removing record (log retained)");
            self.cleanup_session(&id);
        }
    }

    /// Drops the in-memory session and its record file. The log file stays
    /// on disk for later inspection.
    fn cleanup_session(&mut self, session_id: &SessionId) {
        if let Some(session) = self.sessions.remove(session_id) {
            drop(session); // closes the log handle
            self.store.remove_record(session_id);
        }
    }

    /// Number of tracked sessions.
    #[cfg(test)]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

// ============================================================================
// State Helpers
// ============================================================================

/// Applies a lifecycle transition if the edge exists; rejected edges are
/// logged and leave the record untouched.
fn transition(record: &mut SessionRecord, next: SessionState) -> bool {
    if record.state.can_transition_to(next) {
        debug!(
            session_id = %record.session_id,
            from = %record.state,
            to = %next,
            "State transition"
        );
        record.state = next;
        true
    } else {
        warn!(
            session_id = %record.session_id,
            from = %record.state,
            to = %next,
            "Rejected illegal state transition"
        );
        false
    }
}

/// Moves a session into a terminal state and releases its live resources:
/// subscribers get the terminal notification, the PTY master and input
/// channel are dropped, the scrollback is discarded. The log handle stays
/// open until retention cleanup.
fn finish(session: &mut Session, target: SessionState, now: DateTime<Utc>) {
    if !transition(&mut session.record, target) {
        return;
    }
    session.record.touch(now);
    session.terminal_at = Some(now);

    if let Some(hub) = session.hub.take() {
        hub.close();
    }
    session.pty = None;
    session.scrollback = None;
}
