//! Per-connection request loop.
//!
//! ```text
//! accept ──► ConnectionHandler::run
//!               │
//!               ▼
//!        ┌──────────────────────────┐
//!        │ parse buffered requests  │◄────────┐
//!        │ execute, write replies   │         │
//!        └────────────┬─────────────┘         │
//!                     │ need more bytes       │
//!                     ▼                       │
//!        ┌──────────────────────────┐         │
//!        │ read from socket         │─────────┘
//!        └────────────┬─────────────┘
//!                     │ EOF / I/O error
//!                     ▼
//!                  task ends
//! ```
//!
//! TCP is a stream, so a read may hold part of a request or several. Bytes
//! accumulate in a `BytesMut` and complete requests are split off the front.
//! A malformed request gets an error reply and the buffered input is dropped;
//! the connection stays open.

use crate::commands::CommandHandler;
use crate::protocol::parser::MAX_BULK_SIZE;
use crate::protocol::types::prefix;
use crate::protocol::{ParseError, RespParser, RespValue};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Largest inline line we buffer without seeing its newline.
const MAX_INLINE_SIZE: usize = 64 * 1024;

/// Largest partial RESP array we buffer: one maximal bulk payload plus
/// room for its headers.
const MAX_ARRAY_SIZE: usize = MAX_BULK_SIZE + MAX_INLINE_SIZE;

const INITIAL_BUFFER_SIZE: usize = 4096;

/// Server-wide connection counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total connections accepted since startup
    pub connections_accepted: AtomicU64,

    /// Connections currently open
    pub active_connections: AtomicU64,

    /// Requests parsed and executed, across all clients
    pub commands_processed: AtomicU64,

    /// Bytes read from client sockets
    pub bytes_read: AtomicU64,

    /// Bytes of encoded replies written
    pub bytes_written: AtomicU64,
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

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// State for one connected client.
pub struct ConnectionHandler {
    /// The client socket, with buffered writes
    stream: BufWriter<TcpStream>,

    /// Peer address, used in log fields
    addr: SocketAddr,

    /// Bytes read but not yet parsed into a request
    buffer: BytesMut,

    /// Shared command dispatcher
    command_handler: CommandHandler,

    parser: RespParser,

    /// Server-wide counters
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    /// Creates a handler for a freshly accepted socket.
    ///
    /// # Arguments
    ///
    /// * `stream` - The accepted TCP stream
    /// * `addr` - The client's address
    /// * `command_handler` - Dispatcher shared by all connections
    /// * `stats` - Counters shared by all connections
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            parser: RespParser::new(),
            stats,
        }
    }

    /// Serves the client until it disconnects or the connection fails.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) | Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::IoError(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            self.process_buffered().await?;

            if !self.read_more_data().await? {
                // A final line without a newline still counts as a request.
                if !self.buffer.is_empty() {
                    self.buffer.extend_from_slice(b"\n");
                    self.process_buffered().await?;
                }
                return Err(ConnectionError::ClientDisconnected);
            }
        }
    }

    /// Executes every complete request in the buffer.
    async fn process_buffered(&mut self) -> Result<(), ConnectionError> {
        loop {
            let response = match self.try_parse_command() {
                Ok(Some(command)) => {
                    self.stats.command_processed();
                    self.command_handler.execute(command)
                }
                Ok(None) => return Ok(()),
                Err(e) => {
                    warn!(client = %self.addr, error = %e, "Discarding malformed request");
                    self.buffer.clear();
                    RespValue::error(format!("ERR Protocol error: {}", e))
                }
            };

            self.send_response(&response).await?;
        }
    }

    fn try_parse_command(&mut self) -> Result<Option<RespValue>, ParseError> {
        match self.parser.parse(&self.buffer)? {
            Some((value, consumed)) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    client = %self.addr,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed command"
                );
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// How many unparsed bytes may accumulate for the request at the front
    /// of the buffer. A RESP array may carry a large bulk payload; an inline
    /// line is bounded much more tightly.
    fn buffer_limit(&self) -> usize {
        match self.buffer.first() {
            Some(&prefix::ARRAY) => MAX_ARRAY_SIZE,
            _ => MAX_INLINE_SIZE,
        }
    }

    /// Reads from the socket. Returns false on end of stream.
    async fn read_more_data(&mut self) -> Result<bool, ConnectionError> {
        if self.buffer.len() >= self.buffer_limit() {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
        if n == 0 {
            return Ok(false);
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");
        Ok(true)
    }

    async fn send_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(client = %self.addr, bytes = bytes.len(), "Sent response");
        Ok(())
    }
}

/// Ways a connection can end.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Client disconnected")]
    ClientDisconnected,

    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Runs a [`ConnectionHandler`] to completion, logging abnormal endings.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => debug!(client = %addr, error = %e, "Connection ended with error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Snapshotter, StorageEngine};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    struct TestServer {
        addr: SocketAddr,
        storage: Arc<StorageEngine>,
        stats: Arc<ConnectionStats>,
        _dir: TempDir,
    }

    async fn create_test_server() -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(StorageEngine::new());
        let snapshotter = Arc::new(Snapshotter::new(dir.path().join("dump.json")));
        let stats = Arc::new(ConnectionStats::new());

        let handler = CommandHandler::new(Arc::clone(&storage), snapshotter);
        let stats_clone = Arc::clone(&stats);

        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let handler = handler.clone();
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(stream, client_addr, handler, stats));
            }
        });

        TestServer {
            addr,
            storage,
            stats,
            _dir: dir,
        }
    }

    /// Reads until `expected` bytes have arrived or two seconds pass.
    async fn read_exact_len(client: &mut TcpStream, expected: usize) -> Vec<u8> {
        let mut buf = vec![0u8; expected];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .expect("timed out waiting for reply")
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn test_inline_ping_pong() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client.write_all(b"PING\n").await.unwrap();
        assert_eq!(read_exact_len(&mut client, 7).await, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_inline_set_get() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client.write_all(b"SET name Ariz\r\n").await.unwrap();
        assert_eq!(read_exact_len(&mut client, 5).await, b"+OK\r\n");

        client.write_all(b"get name\r\n").await.unwrap();
        assert_eq!(read_exact_len(&mut client, 10).await, b"$4\r\nAriz\r\n");

        client.write_all(b"GET missing\n").await.unwrap();
        assert_eq!(read_exact_len(&mut client, 5).await, b"$-1\r\n");
    }

    #[tokio::test]
    async fn test_resp_array_request() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client
            .write_all(b"*3\r\n$5\r\nRPUSH\r\n$1\r\nq\r\n$1\r\nx\r\n")
            .await
            .unwrap();
        assert_eq!(read_exact_len(&mut client, 4).await, b":1\r\n");
    }

    #[tokio::test]
    async fn test_pipelined_lines() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client
            .write_all(b"SET k1 v1\nSET k2 v2\nGET k1\nGET k2\n")
            .await
            .unwrap();

        let expected = b"+OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n";
        assert_eq!(read_exact_len(&mut client, expected.len()).await, expected);
    }

    #[tokio::test]
    async fn test_request_split_across_writes() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client.write_all(b"INCR cou").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(b"nter\r\n").await.unwrap();

        assert_eq!(read_exact_len(&mut client, 4).await, b":1\r\n");
    }

    #[tokio::test]
    async fn test_errors_keep_connection_open() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client.write_all(b"BOGUS\n").await.unwrap();
        let expected = b"-ERR unknown command 'BOGUS'\r\n";
        assert_eq!(read_exact_len(&mut client, expected.len()).await, expected);

        client.write_all(b"\n").await.unwrap();
        let expected = b"-ERR empty command\r\n";
        assert_eq!(read_exact_len(&mut client, expected.len()).await, expected);

        client.write_all(b"*x\r\n").await.unwrap();
        let mut buf = [0u8; 1];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf[0], b'-');
        // Drain the rest of the protocol error line.
        let mut line = Vec::new();
        loop {
            client.read_exact(&mut buf).await.unwrap();
            line.push(buf[0]);
            if line.ends_with(b"\r\n") {
                break;
            }
        }

        client.write_all(b"PING\n").await.unwrap();
        assert_eq!(read_exact_len(&mut client, 7).await, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_large_resp_value_is_stored() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        let value = "v".repeat(100 * 1024);
        let request = format!(
            "*3\r\n$3\r\nSET\r\n$3\r\nbig\r\n${}\r\n{}\r\n",
            value.len(),
            value
        );
        client.write_all(request.as_bytes()).await.unwrap();
        assert_eq!(read_exact_len(&mut client, 5).await, b"+OK\r\n");

        assert_eq!(server.storage.get("big"), Ok(Some(value)));
    }

    #[tokio::test]
    async fn test_oversized_inline_line_closes_connection() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        let line = "x".repeat(MAX_INLINE_SIZE + 1);
        // The server may close while we are still writing.
        let _ = client.write_all(line.as_bytes()).await;

        let mut buf = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut buf)).await;
        assert!(matches!(read, Ok(Ok(0)) | Ok(Err(_))));
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_line_break_in_command_name_stays_in_one_reply() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client
            .write_all(b"*1\r\n$13\r\nFOO'\r\n+OK\r\n-X\r\nPING\r\n")
            .await
            .unwrap();

        let expected = b"-ERR unknown command 'FOO'  +OK  -X'\r\n+PONG\r\n";
        assert_eq!(read_exact_len(&mut client, expected.len()).await, expected);
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client.write_all(b"SET last word").await.unwrap();
        client.shutdown().await.unwrap();

        assert_eq!(read_exact_len(&mut client, 5).await, b"+OK\r\n");
        assert_eq!(server.storage.get("last"), Ok(Some("word".to_string())));
    }

    #[tokio::test]
    async fn test_concurrent_clients_incr() {
        let server = create_test_server().await;

        let clients: Vec<_> = (0..8)
            .map(|_| {
                let addr = server.addr;
                tokio::spawn(async move {
                    let mut client = TcpStream::connect(addr).await.unwrap();
                    for _ in 0..50 {
                        client.write_all(b"INCR hits\n").await.unwrap();
                        let mut buf = [0u8; 1];
                        // Integer reply: read through the CRLF.
                        let mut reply = Vec::new();
                        while !reply.ends_with(b"\r\n") {
                            client.read_exact(&mut buf).await.unwrap();
                            reply.push(buf[0]);
                        }
                        assert_eq!(reply[0], b':');
                    }
                })
            })
            .collect();

        for c in clients {
            c.await.unwrap();
        }

        assert_eq!(server.storage.get("hits"), Ok(Some("400".to_string())));
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let server = create_test_server().await;
        let stats = &server.stats;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(server.addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        client.write_all(b"PING\r\n").await.unwrap();
        let _ = read_exact_len(&mut client, 7).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(stats.commands_processed.load(Ordering::Relaxed) >= 1);
        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert!(stats.bytes_written.load(Ordering::Relaxed) > 0);

        drop(client);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
