//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Parses newline-delimited JSON requests
//! - Routes them to the session manager
//! - Runs one forwarder task per subscribed session, streaming output into
//!   the shared connection writer
//!
//! Subscriptions are connection-scoped: whatever is still subscribed when the
//! client disconnects is torn down here. A failed request always produces a
//! typed `error` reply; the connection itself is never closed for one.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use termcast_core::{SessionError, SessionId};
use termcast_protocol::{ClientRequest, ProtocolVersion, Request, ServerMessage};

use crate::hub::Subscription;
use crate::manager::ManagerHandle;

/// Writer shared between the request loop and the forwarder tasks.
pub type SharedWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// Maximum message size (1 MB).
const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Write timeout: a socket this unresponsive gets its messages dropped.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection handler for a single client.
pub struct ConnectionHandler {
    reader: BufReader<OwnedReadHalf>,
    writer: SharedWriter,
    manager: ManagerHandle,

    /// One output forwarder per subscribed session.
    subscriptions: HashMap<SessionId, JoinHandle<()>>,

    /// Unique number for this connection (logging only).
    connection_number: u64,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        manager: ManagerHandle,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            manager,
            subscriptions: HashMap::new(),
            connection_number,
        }
    }

    /// Runs the request loop until the client disconnects, then tears down
    /// every subscription this connection held.
    pub async fn run(mut self) {
        debug!(connection = self.connection_number, "Client connected");

        loop {
            match self.read_request().await {
                Ok(request) => {
                    if let Err(e) = self.handle_request(request).await {
                        debug!(
                            connection = self.connection_number,
                            error = %e,
                            "Write failed, closing connection"
                        );
                        break;
                    }
                }
                Err(ConnectionError::Eof) => break,
                Err(ConnectionError::Parse(reason)) => {
                    // Malformed input is the client's problem, not the
                    // connection's: report and keep reading.
                    let reply = ServerMessage::error(
                        &format!("invalid message: {reason}"),
                        None,
                        Some("transport_error"),
                    );
                    if write_message(&self.writer, &reply).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(
                        connection = self.connection_number,
                        error = %e,
                        "Connection closed"
                    );
                    break;
                }
            }
        }

        // Implicit unsubscribe for everything this connection watched.
        for (session_id, task) in self.subscriptions.drain() {
            debug!(
                connection = self.connection_number,
                session_id = %session_id,
                "Dropping subscription on disconnect"
            );
            task.abort();
        }

        info!(connection = self.connection_number, "Client disconnected");
    }

    /// Handles a single request; `Err` means the reply could not be written.
    async fn handle_request(&mut self, request: ClientRequest) -> Result<(), ConnectionError> {
        if !request
            .protocol_version
            .is_compatible_with(&ProtocolVersion::CURRENT)
        {
            let reply = ServerMessage::error(
                &format!(
                    "protocol version {} not compatible with server version {}",
                    request.protocol_version,
                    ProtocolVersion::CURRENT
                ),
                Some(request.request.name()),
                Some("transport_error"),
            );
            return write_message(&self.writer, &reply).await;
        }

        let name = request.request.name();
        match request.request {
            Request::Spawn {
                session_id,
                command,
                cwd,
            } => match self.manager.spawn(session_id, command, cwd).await {
                Ok(record) => self.send(ServerMessage::spawned(record)).await?,
                Err(e) => self.send_session_error(name, &e).await?,
            },

            Request::Subscribe { session_id } => {
                self.handle_subscribe(session_id).await?;
            }

            Request::Unsubscribe { session_id } => {
                // Idempotent: unknown or already-removed subscriptions are a no-op.
                if let Some(task) = self.subscriptions.remove(&session_id) {
                    task.abort();
                    debug!(
                        connection = self.connection_number,
                        session_id = %session_id,
                        "Unsubscribed"
                    );
                }
            }

            Request::Input { session_id, data } => {
                if let Err(e) = self
                    .manager
                    .write_input(session_id, data.into_bytes())
                    .await
                {
                    self.send_session_error(name, &e).await?;
                }
            }

            Request::Signal { session_id, signal } => {
                if let Err(e) = self.manager.signal(session_id, signal).await {
                    self.send_session_error(name, &e).await?;
                }
            }

            Request::Resize {
                session_id,
                rows,
                cols,
            } => {
                if let Err(e) = self.manager.resize(session_id, rows, cols).await {
                    self.send_session_error(name, &e).await?;
                }
            }

            Request::Terminate { session_id } => {
                match self.manager.terminate(session_id.clone()).await {
                    Ok(()) => self.send(ServerMessage::terminated(session_id)).await?,
                    Err(e) => self.send_session_error(name, &e).await?,
                }
            }

            Request::List => {
                let sessions = self.manager.list().await;
                self.send(ServerMessage::sessions(sessions)).await?;
            }

            Request::History { session_id, lines } => {
                match self.manager.history(session_id.clone(), lines).await {
                    Ok(data) => {
                        let text = String::from_utf8_lossy(&data).into_owned();
                        self.send(ServerMessage::output(session_id, text)).await?;
                    }
                    Err(e) => self.send_session_error(name, &e).await?,
                }
            }

            Request::Ping { seq } => {
                self.send(ServerMessage::pong(seq)).await?;
            }
        }

        Ok(())
    }

    /// Subscribes this connection to a session: snapshot first, then the
    /// acknowledgment, then a forwarder task for the live stream. Nothing is
    /// replayed twice and nothing between snapshot and stream is lost.
    async fn handle_subscribe(&mut self, session_id: SessionId) -> Result<(), ConnectionError> {
        if let Some(task) = self.subscriptions.get(&session_id) {
            if !task.is_finished() {
                // Already streaming to this connection; just acknowledge.
                return self.send(ServerMessage::subscribed(session_id)).await;
            }
            // The previous stream ended (session terminated); treat this as
            // a fresh subscribe.
            self.subscriptions.remove(&session_id);
        }

        match self.manager.subscribe(session_id.clone()).await {
            Ok(reply) => {
                let snapshot = String::from_utf8_lossy(&reply.snapshot).into_owned();
                self.send(ServerMessage::buffer(session_id.clone(), snapshot))
                    .await?;
                self.send(ServerMessage::subscribed(session_id.clone()))
                    .await?;

                let task = spawn_forwarder(
                    session_id.clone(),
                    reply.subscription,
                    Arc::clone(&self.writer),
                );
                self.subscriptions.insert(session_id, task);
                Ok(())
            }
            Err(e) => self.send_session_error("subscribe", &e).await,
        }
    }

    async fn send(&self, msg: ServerMessage) -> Result<(), ConnectionError> {
        write_message(&self.writer, &msg).await
    }

    async fn send_session_error(
        &self,
        in_reply_to: &str,
        err: &SessionError,
    ) -> Result<(), ConnectionError> {
        let reply = ServerMessage::error(&err.to_string(), Some(in_reply_to), Some(err.code()));
        write_message(&self.writer, &reply).await
    }

    /// Reads one newline-delimited request.
    async fn read_request(&mut self) -> Result<ClientRequest, ConnectionError> {
        let mut line = String::new();

        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        serde_json::from_str(&line).map_err(|e| ConnectionError::Parse(e.to_string()))
    }
}

/// Streams a subscription into the connection writer until the session
/// terminates or the socket dies.
fn spawn_forwarder(
    session_id: SessionId,
    mut subscription: Subscription,
    writer: SharedWriter,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match subscription.next().await {
                Some(chunk) => {
                    let text = String::from_utf8_lossy(&chunk).into_owned();
                    let msg = ServerMessage::output(session_id.clone(), text);
                    if write_message(&writer, &msg).await.is_err() {
                        debug!(session_id = %session_id, "Forwarder write failed, stopping");
                        break;
                    }
                }
                None => {
                    let _ =
                        write_message(&writer, &ServerMessage::terminated(session_id.clone()))
                            .await;
                    break;
                }
            }
        }
        if subscription.skipped() > 0 {
            warn!(
                session_id = %session_id,
                skipped = subscription.skipped(),
                "Slow subscriber dropped chunks"
            );
        }
    })
}

/// Writes one message to a shared connection writer with a timeout.
pub(crate) async fn write_message(
    writer: &SharedWriter,
    msg: &ServerMessage,
) -> Result<(), ConnectionError> {
    let json = serde_json::to_string(msg).map_err(|e| ConnectionError::Parse(e.to_string()))?;

    let mut writer = writer.lock().await;

    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}
