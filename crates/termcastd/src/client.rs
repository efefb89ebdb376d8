//! Thin one-shot client for the CLI subcommands.
//!
//! Connects to the daemon socket, sends a single request, and reads replies.
//! Interactive viewers keep a long-lived connection; the CLI only needs this
//! request/reply shape.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use termcast_protocol::{ClientRequest, ServerMessage};

/// One connection to the termcast daemon.
pub struct DaemonClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl DaemonClient {
    /// Connects to the daemon's Unix socket.
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).await.with_context(|| {
            format!(
                "failed to connect to daemon at {} (is termcastd running?)",
                socket_path.display()
            )
        })?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Sends a request without waiting for a reply.
    pub async fn send(&mut self, request: &ClientRequest) -> Result<()> {
        let json = serde_json::to_string(request).context("failed to encode request")?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Reads the next message from the daemon.
    pub async fn recv(&mut self) -> Result<ServerMessage> {
        let mut line = String::new();
        let bytes = self.reader.read_line(&mut line).await?;
        if bytes == 0 {
            anyhow::bail!("daemon closed the connection");
        }
        serde_json::from_str(&line).context("failed to decode daemon reply")
    }

    /// Sends a request and returns the next reply.
    pub async fn request(&mut self, request: &ClientRequest) -> Result<ServerMessage> {
        self.send(request).await?;
        self.recv().await
    }
}
