//! A single connection to a ReQL server.
//!
//! This module provides the connection type that handles:
//! - TCP connection establishment and the protocol handshake
//! - Framed query writes and framed response reads
//! - A per-round-trip deadline applied to every socket operation
//! - Matching responses to the outstanding token

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::error::{WireError, WireResult};
use super::protocol::*;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A connection to a ReQL server.
///
/// At most one query may be in flight on a connection at a time.
pub struct Connection {
    /// TCP stream reader
    reader: BufReader<tokio::io::ReadHalf<TcpStream>>,
    /// TCP stream writer
    writer: BufWriter<tokio::io::WriteHalf<TcpStream>>,
    /// Absolute deadline for socket operations, if any
    deadline: Option<Instant>,
    /// Whether the connection is closed
    closed: bool,
    /// Read buffer for incoming frames
    read_buffer: BytesMut,
    /// Process-unique id, used in log events
    id: u64,
}

impl Connection {
    /// Dial `address` and perform the handshake.
    ///
    /// `deadline` bounds both the dial and the handshake write, and stays
    /// set on the returned connection.
    pub async fn connect(address: &str, deadline: Option<Instant>) -> WireResult<Self> {
        let stream = with_deadline(deadline, TcpStream::connect(address)).await?;
        stream.set_nodelay(true).map_err(WireError::Io)?;

        let (read_half, write_half) = tokio::io::split(stream);
        let mut conn = Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            deadline,
            closed: false,
            read_buffer: BytesMut::with_capacity(16384),
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        };

        conn.handshake().await?;
        debug!(conn = conn.id, %address, "wire.connection.open");
        Ok(conn)
    }

    /// Send the protocol magic. The server expects no further bytes until
    /// the first query.
    async fn handshake(&mut self) -> WireResult<()> {
        let magic = PROTOCOL_MAGIC.to_le_bytes();
        with_deadline(self.deadline, self.writer.write_all(&magic)).await?;
        with_deadline(self.deadline, self.writer.flush()).await?;
        Ok(())
    }

    /// Set or clear the absolute deadline for subsequent socket operations.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    /// Write one framed query.
    pub async fn send_query(&mut self, query: &Query) -> WireResult<()> {
        if self.closed {
            return Err(WireError::ConnectionClosed);
        }

        let framed = frame(query);
        trace!(conn = self.id, token = query.token, kind = ?query.query_type, "wire.query.send");

        let mut result = with_deadline(self.deadline, self.writer.write_all(&framed)).await;
        if result.is_ok() {
            result = with_deadline(self.deadline, self.writer.flush()).await;
        }

        if result.is_err() {
            self.closed = true;
        }
        result
    }

    /// Read responses until one for `token` arrives.
    ///
    /// Responses carrying a smaller token are leftovers of an abandoned
    /// query on this connection and are skipped. A larger token means the
    /// stream is out of sync.
    pub async fn receive_response(&mut self, token: i64) -> WireResult<Response> {
        loop {
            let response = self.receive_frame().await?;

            if response.token == token {
                return Ok(response);
            }

            if response.token < token {
                warn!(
                    conn = self.id,
                    expected = token,
                    received = response.token,
                    "wire.response.stale_token"
                );
                continue;
            }

            self.closed = true;
            return Err(WireError::Protocol(format!(
                "Response token {} is ahead of outstanding token {}",
                response.token, token
            )));
        }
    }

    /// Close the connection.
    pub async fn close(&mut self) -> WireResult<()> {
        if self.closed {
            return Ok(());
        }

        self.closed = true;
        debug!(conn = self.id, "wire.connection.close");
        self.writer.shutdown().await.map_err(WireError::Io)
    }

    /// Check if the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Process-unique connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Read and decode one response frame.
    async fn receive_frame(&mut self) -> WireResult<Response> {
        loop {
            match split_frame(&mut self.read_buffer) {
                Ok(Some(payload)) => {
                    return Response::decode(&payload).map_err(|e| {
                        self.closed = true;
                        e
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    self.closed = true;
                    return Err(e);
                }
            }

            let mut buf = [0u8; 4096];
            let n = match with_deadline(self.deadline, self.reader.read(&mut buf)).await {
                Ok(n) => n,
                Err(e) => {
                    self.closed = true;
                    return Err(e);
                }
            };

            if n == 0 {
                self.closed = true;
                return Err(WireError::ConnectionClosed);
            }

            self.read_buffer.extend_from_slice(&buf[..n]);
        }
    }
}

/// Run a socket operation, failing with `Timeout` once `deadline` passes.
async fn with_deadline<T, F>(deadline: Option<Instant>, op: F) -> WireResult<T>
where
    F: Future<Output = io::Result<T>>,
{
    match deadline {
        Some(at) => match tokio::time::timeout_at(at, op).await {
            Ok(result) => result.map_err(WireError::from),
            Err(_) => Err(WireError::Timeout),
        },
        None => op.await.map_err(WireError::from),
    }
}
