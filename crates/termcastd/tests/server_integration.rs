//! Integration tests for the Unix socket server.
//!
//! These exercise the full wire protocol against a running daemon server:
//! spawn/subscribe/input/terminate flows, typed errors that keep the
//! connection alive, and connection-scoped subscription cleanup.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - the panic-free policy applies
//! to production code only.

#![cfg(unix)]

use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use termcast_core::{SessionId, SessionState};
use termcast_protocol::{ClientRequest, ProtocolVersion, Request, ServerMessage};
use termcastd::config::Config;
use termcastd::manager::{spawn_manager, ManagerHandle};
use termcastd::server::DaemonServer;
use termcastd::store::RecordStore;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for the server socket to appear.
const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between socket existence checks.
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Deadline for protocol exchanges.
const WAIT: Duration = Duration::from_secs(10);

// ============================================================================
// Test Helpers
// ============================================================================

/// Test server context that manages server lifecycle and cleanup.
struct TestServer {
    socket_path: PathBuf,
    manager: ManagerHandle,
    cancel_token: CancellationToken,
    _temp_dir: TempDir,
}

impl TestServer {
    /// Spawns a daemon server on a temp socket with a temp store.
    async fn spawn() -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");

        let mut config = Config::default();
        config.socket_path = temp_dir.path().join("test.sock");
        config.store_dir = temp_dir.path().join("terminals");
        config.sweep_interval = Duration::from_millis(100);
        config.terminate_grace = Duration::from_millis(500);

        let socket_path = config.socket_path.clone();
        let store = RecordStore::new(&config.store_dir).expect("create store");
        let manager = spawn_manager(config, store);
        let cancel_token = CancellationToken::new();

        let server = DaemonServer::new(socket_path.clone(), manager.clone(), cancel_token.clone());
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        // Wait for the socket to be ready.
        let start = tokio::time::Instant::now();
        while start.elapsed() < SOCKET_WAIT_TIMEOUT {
            if socket_path.exists() {
                break;
            }
            sleep(SOCKET_POLL_INTERVAL).await;
        }
        assert!(
            socket_path.exists(),
            "Server socket did not appear within {SOCKET_WAIT_TIMEOUT:?}"
        );

        TestServer {
            socket_path,
            manager,
            cancel_token,
            _temp_dir: temp_dir,
        }
    }

    /// Creates a client connection to the server.
    async fn connect(&self) -> TestClient {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .expect("connect to server");
        TestClient::new(stream)
    }

    /// Waits until the manager reports a session in `state`.
    async fn wait_for_state(&self, id: &SessionId, state: SessionState) {
        let start = tokio::time::Instant::now();
        loop {
            if let Some(record) = self.manager.get(id.clone()).await {
                if record.state == state {
                    return;
                }
            }
            assert!(
                start.elapsed() < WAIT,
                "timed out waiting for {id} to reach {state}"
            );
            sleep(Duration::from_millis(25)).await;
        }
    }

    /// Shuts down the server gracefully.
    async fn shutdown(self) {
        self.cancel_token.cancel();
        sleep(Duration::from_millis(100)).await;
    }
}

/// Test client connection with protocol helpers.
struct TestClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Sends a request to the server.
    async fn send(&mut self, msg: ClientRequest) {
        let json = serde_json::to_string(&msg).unwrap();
        self.send_raw(&json).await;
    }

    /// Sends a raw line (for malformed-input tests).
    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Receives one message from the server.
    async fn recv(&mut self) -> ServerMessage {
        let mut line = String::new();
        timeout(WAIT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for server message")
            .unwrap();
        assert!(!line.is_empty(), "server closed the connection");
        serde_json::from_str(&line).unwrap()
    }

    /// Collects `output` data until `needle` appears; returns the collected
    /// text and whether a `terminated` push was seen along the way.
    async fn collect_output_until(&mut self, needle: &str) -> (String, bool) {
        timeout(WAIT, async {
            let mut collected = String::new();
            let mut terminated = false;
            loop {
                match self.recv().await {
                    ServerMessage::Output { data, .. } => {
                        collected.push_str(&data);
                        if collected.contains(needle) {
                            return (collected, terminated);
                        }
                    }
                    ServerMessage::Buffer { data, .. } => {
                        collected.push_str(&data);
                        if collected.contains(needle) {
                            return (collected, terminated);
                        }
                    }
                    ServerMessage::Terminated { .. } => {
                        terminated = true;
                        return (collected, terminated);
                    }
                    _ => {}
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for output containing {needle:?}"))
    }
}

fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

// ============================================================================
// Basic Protocol
// ============================================================================

#[tokio::test]
async fn list_starts_empty() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.send(ClientRequest::list()).await;
    match client.recv().await {
        ServerMessage::Sessions { sessions } => assert!(sessions.is_empty()),
        other => panic!("expected Sessions, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn ping_pong() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.send(ClientRequest::ping(7)).await;
    match client.recv().await {
        ServerMessage::Pong { seq } => assert_eq!(seq, 7),
        other => panic!("expected Pong, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn malformed_json_yields_error_but_keeps_connection() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.send_raw("this is not json").await;
    match client.recv().await {
        ServerMessage::Error { code, .. } => {
            assert_eq!(code.as_deref(), Some("transport_error"));
        }
        other => panic!("expected Error, got {other:?}"),
    }

    // The connection survives the bad request.
    client.send(ClientRequest::ping(1)).await;
    assert!(matches!(client.recv().await, ServerMessage::Pong { seq: 1 }));

    server.shutdown().await;
}

#[tokio::test]
async fn incompatible_protocol_version_is_rejected_politely() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    let msg = ClientRequest {
        protocol_version: ProtocolVersion::new(2, 0),
        request: Request::List,
    };
    client.send(msg).await;

    match client.recv().await {
        ServerMessage::Error {
            code, in_reply_to, ..
        } => {
            assert_eq!(code.as_deref(), Some("transport_error"));
            assert_eq!(in_reply_to.as_deref(), Some("list"));
        }
        other => panic!("expected Error, got {other:?}"),
    }

    // Still connected.
    client.send(ClientRequest::ping(2)).await;
    assert!(matches!(client.recv().await, ServerMessage::Pong { seq: 2 }));

    server.shutdown().await;
}

// ============================================================================
// Session Flows
// ============================================================================

#[tokio::test]
async fn spawn_subscribe_stream_and_terminal_notification() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    let id = SessionId::new("ws-1");

    client
        .send(ClientRequest::spawn(id.clone(), sh("echo hi; sleep 1"), None))
        .await;
    match client.recv().await {
        ServerMessage::Spawned { session } => {
            assert_eq!(session.session_id, id);
            assert_eq!(session.state, SessionState::Running);
            assert!(session.pid.is_some());
        }
        other => panic!("expected Spawned, got {other:?}"),
    }

    client.send(ClientRequest::subscribe(id.clone())).await;

    // Snapshot first, then the acknowledgment.
    let buffer_data = match client.recv().await {
        ServerMessage::Buffer { session_id, data } => {
            assert_eq!(session_id, id);
            data
        }
        other => panic!("expected Buffer, got {other:?}"),
    };
    match client.recv().await {
        ServerMessage::Subscribed { session_id } => assert_eq!(session_id, id),
        other => panic!("expected Subscribed, got {other:?}"),
    }

    // The echo shows up either in the snapshot or in the live stream.
    if !buffer_data.contains("hi") {
        let (collected, _) = client.collect_output_until("hi").await;
        assert!(collected.contains("hi"));
    }

    // When the session completes, the subscriber is told.
    let terminated = timeout(WAIT, async {
        loop {
            if let ServerMessage::Terminated { session_id } = client.recv().await {
                break session_id;
            }
        }
    })
    .await
    .expect("timed out waiting for terminated push");
    assert_eq!(terminated, id);

    server.shutdown().await;
}

#[tokio::test]
async fn input_flows_through_the_socket() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    let id = SessionId::new("ws-input");

    client
        .send(ClientRequest::spawn(id.clone(), sh("read x; echo got:$x"), None))
        .await;
    assert!(matches!(client.recv().await, ServerMessage::Spawned { .. }));

    client.send(ClientRequest::subscribe(id.clone())).await;
    assert!(matches!(client.recv().await, ServerMessage::Buffer { .. }));
    assert!(matches!(client.recv().await, ServerMessage::Subscribed { .. }));

    client.send(ClientRequest::input(id.clone(), "ping\n")).await;

    let (collected, _) = client.collect_output_until("got:ping").await;
    assert!(collected.contains("got:ping"));

    server.shutdown().await;
}

#[tokio::test]
async fn terminate_via_socket_replies_terminated() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    let id = SessionId::new("ws-term");

    client
        .send(ClientRequest::spawn(id.clone(), sh("sleep 5"), None))
        .await;
    assert!(matches!(client.recv().await, ServerMessage::Spawned { .. }));

    client.send(ClientRequest::terminate(id.clone())).await;
    match client.recv().await {
        ServerMessage::Terminated { session_id } => assert_eq!(session_id, id),
        other => panic!("expected Terminated, got {other:?}"),
    }

    server.wait_for_state(&id, SessionState::Terminated).await;
    server.shutdown().await;
}

#[tokio::test]
async fn duplicate_spawn_via_socket_is_a_typed_error() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    let id = SessionId::new("ws-dup");

    client
        .send(ClientRequest::spawn(id.clone(), sh("sleep 5"), None))
        .await;
    assert!(matches!(client.recv().await, ServerMessage::Spawned { .. }));

    client
        .send(ClientRequest::spawn(id.clone(), sh("echo nope"), None))
        .await;
    match client.recv().await {
        ServerMessage::Error {
            code, in_reply_to, ..
        } => {
            assert_eq!(code.as_deref(), Some("duplicate_session"));
            assert_eq!(in_reply_to.as_deref(), Some("spawn"));
        }
        other => panic!("expected Error, got {other:?}"),
    }

    client.send(ClientRequest::terminate(id)).await;
    assert!(matches!(client.recv().await, ServerMessage::Terminated { .. }));

    server.shutdown().await;
}

#[tokio::test]
async fn unknown_session_operations_keep_the_connection_alive() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client
        .send(ClientRequest::input(SessionId::new("ghost"), "hello"))
        .await;
    match client.recv().await {
        ServerMessage::Error {
            code, in_reply_to, ..
        } => {
            assert_eq!(code.as_deref(), Some("no_such_session"));
            assert_eq!(in_reply_to.as_deref(), Some("input"));
        }
        other => panic!("expected Error, got {other:?}"),
    }

    client
        .send(ClientRequest::subscribe(SessionId::new("ghost")))
        .await;
    match client.recv().await {
        ServerMessage::Error { code, .. } => {
            assert_eq!(code.as_deref(), Some("no_such_session"));
        }
        other => panic!("expected Error, got {other:?}"),
    }

    client.send(ClientRequest::ping(3)).await;
    assert!(matches!(client.recv().await, ServerMessage::Pong { seq: 3 }));

    server.shutdown().await;
}

#[tokio::test]
async fn unsubscribe_is_idempotent() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    let id = SessionId::new("ws-unsub");

    client
        .send(ClientRequest::spawn(id.clone(), sh("sleep 3"), None))
        .await;
    assert!(matches!(client.recv().await, ServerMessage::Spawned { .. }));

    client.send(ClientRequest::subscribe(id.clone())).await;
    assert!(matches!(client.recv().await, ServerMessage::Buffer { .. }));
    assert!(matches!(client.recv().await, ServerMessage::Subscribed { .. }));

    // Unsubscribing twice (and for a never-subscribed id) is a no-op.
    client.send(ClientRequest::unsubscribe(id.clone())).await;
    client.send(ClientRequest::unsubscribe(id.clone())).await;
    client
        .send(ClientRequest::unsubscribe(SessionId::new("never-subbed")))
        .await;

    client.send(ClientRequest::ping(4)).await;
    assert!(matches!(client.recv().await, ServerMessage::Pong { seq: 4 }));

    client.send(ClientRequest::terminate(id)).await;
    assert!(matches!(client.recv().await, ServerMessage::Terminated { .. }));

    server.shutdown().await;
}

#[tokio::test]
async fn history_via_socket_returns_output_shaped_reply() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    let id = SessionId::new("ws-hist");

    client
        .send(ClientRequest::spawn(id.clone(), sh("echo hist-line"), None))
        .await;
    assert!(matches!(client.recv().await, ServerMessage::Spawned { .. }));

    server.wait_for_state(&id, SessionState::Completed).await;

    // The final chunk may land in the log just after the exit report.
    let start = tokio::time::Instant::now();
    loop {
        client
            .send(ClientRequest::history(id.clone(), Some(50)))
            .await;
        match client.recv().await {
            ServerMessage::Output { session_id, data, .. } => {
                assert_eq!(session_id, id);
                if data.contains("hist-line") {
                    break;
                }
            }
            other => panic!("expected Output, got {other:?}"),
        }
        assert!(start.elapsed() < WAIT, "history never contained 'hist-line'");
        sleep(Duration::from_millis(25)).await;
    }

    server.shutdown().await;
}

#[tokio::test]
async fn two_connections_can_watch_the_same_session() {
    let server = TestServer::spawn().await;
    let mut a = server.connect().await;
    let mut b = server.connect().await;
    let id = SessionId::new("ws-two");

    a.send(ClientRequest::spawn(id.clone(), sh("read x; echo fan:$x"), None))
        .await;
    assert!(matches!(a.recv().await, ServerMessage::Spawned { .. }));

    a.send(ClientRequest::subscribe(id.clone())).await;
    assert!(matches!(a.recv().await, ServerMessage::Buffer { .. }));
    assert!(matches!(a.recv().await, ServerMessage::Subscribed { .. }));

    b.send(ClientRequest::subscribe(id.clone())).await;
    assert!(matches!(b.recv().await, ServerMessage::Buffer { .. }));
    assert!(matches!(b.recv().await, ServerMessage::Subscribed { .. }));

    a.send(ClientRequest::input(id.clone(), "out\n")).await;

    let (from_a, _) = a.collect_output_until("fan:out").await;
    assert!(from_a.contains("fan:out"));
    let (from_b, _) = b.collect_output_until("fan:out").await;
    assert!(from_b.contains("fan:out"));

    server.shutdown().await;
}
