//! Connection Handler
//!
//! Each accepted socket gets its own task running the command loop:
//!
//! ```text
//! 1. accumulate socket bytes until one full request frames
//! 2. dispatch it (lowercased first argument selects the command)
//! 3. write the reply - or the command error - and flush
//! 4. repeat until EOF or a fatal error
//! ```
//!
//! TCP is a stream, so a read may deliver half a request or several
//! pipelined ones; the `BytesMut` buffer plus the incremental parser
//! handle both. Within one connection replies go out strictly in request
//! order.
//!
//! Error handling follows the taxonomy in the crate docs: command errors
//! (bad arity, WRONGTYPE, unknown command) are replied to and the loop
//! continues; framing and I/O errors get one best-effort
//! `ERR invalid request` reply and the connection closes. EOF closes
//! quietly, whether the peer hung up between requests or mid-frame.

use crate::commands::Dispatcher;
use crate::protocol::{parse_request, FrameError, ReplyWriter};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Maximum bytes of unparsed request data per connection (1 MB)
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Initial read buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Shared connection counters, read by INFO.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Currently connected clients.
    pub fn active(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }
}

/// Errors that terminate a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent bytes that do not frame as a request
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The peer closed the connection between requests
    #[error("client disconnected")]
    Disconnected,

    /// The peer closed the connection mid-request
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// The unparsed request exceeded [`MAX_BUFFER_SIZE`]
    #[error("request buffer limit exceeded")]
    BufferFull,
}

/// One client socket: framed reader plus buffered writer.
pub struct Connection {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    reply: ReplyWriter,
}

impl Connection {
    pub fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            reply: ReplyWriter::new(),
        }
    }

    /// Reads one complete request, pulling more socket data as needed.
    pub async fn read_request(&mut self) -> Result<Vec<Bytes>, ConnectionError> {
        loop {
            if !self.buffer.is_empty() {
                if let Some((args, consumed)) = parse_request(&self.buffer)? {
                    let _ = self.buffer.split_to(consumed);
                    trace!(
                        client = %self.addr,
                        consumed,
                        remaining = self.buffer.len(),
                        "parsed request"
                    );
                    return Ok(args);
                }
            }

            if self.buffer.len() >= MAX_BUFFER_SIZE {
                return Err(ConnectionError::BufferFull);
            }
            if self.buffer.capacity() - self.buffer.len() < 1024 {
                self.buffer.reserve(4096);
            }

            let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Err(if self.buffer.is_empty() {
                    ConnectionError::Disconnected
                } else {
                    ConnectionError::UnexpectedEof
                });
            }
        }
    }

    /// The pending reply buffer for the current request.
    pub fn reply(&mut self) -> &mut ReplyWriter {
        &mut self.reply
    }

    /// Writes the pending reply to the socket and flushes.
    pub async fn flush_reply(&mut self) -> std::io::Result<()> {
        let frame = self.reply.take();
        self.stream.write_all(&frame).await?;
        self.stream.flush().await
    }
}

/// Runs the command loop for one client until it disconnects.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    dispatcher: Dispatcher,
    stats: Arc<ConnectionStats>,
) {
    stats.connection_opened();
    info!(client = %addr, "client connected");

    let mut conn = Connection::new(stream, addr);
    match serve(&mut conn, &dispatcher, &stats).await {
        Ok(()) => debug!(client = %addr, "client disconnected"),
        Err(e) => {
            warn!(client = %addr, error = %e, "connection error");
            // one best-effort error reply before closing
            conn.reply.clear();
            conn.reply.error("ERR invalid request");
            let _ = conn.flush_reply().await;
        }
    }

    stats.connection_closed();
}

/// The read-dispatch-reply loop.
async fn serve(
    conn: &mut Connection,
    dispatcher: &Dispatcher,
    stats: &ConnectionStats,
) -> Result<(), ConnectionError> {
    loop {
        let args = match conn.read_request().await {
            Ok(args) => args,
            // any EOF, clean or mid-frame, closes quietly
            Err(ConnectionError::Disconnected) | Err(ConnectionError::UnexpectedEof) => {
                return Ok(())
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = dispatcher.dispatch(&args, conn.reply()) {
            // handlers that fail have written nothing
            conn.reply().clear();
            conn.reply().error(&e.to_string());
        }
        stats.command_processed();
        conn.flush_reply().await?;
    }
}
