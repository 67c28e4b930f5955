//! # Transport Abstraction
//!
//! A minimal, async interface for moving router frames between processes.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: A transport knows nothing about events or cookies. It
//!   moves opaque, already framed buffers.
//! - **Duplex**: Sending and receiving are independent; a reader task and a
//!   writer task may use the same transport concurrently.
//!
//! `TcpTransport` frames every buffer as `[4-byte BE length][payload]`.

use std::fmt;

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

/// Largest frame accepted from a socket.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone)]
pub enum Error {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// A frame larger than `MAX_FRAME_SIZE` was sent or announced.
    PayloadTooLarge(usize),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::PayloadTooLarge(len) => write!(f, "Frame of {} bytes exceeds maximum {}", len, MAX_FRAME_SIZE),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A bidirectional byte pipe.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one frame.
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Waits for the next frame. `Ok(None)` means the peer closed cleanly.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;
}

/// Opens transports to the router, once per connection attempt.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn Transport>>;
}

pub struct TcpTransport {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        Self { reader: Mutex::new(reader), writer: Mutex::new(writer) }
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn send(&self, payload: &[u8]) -> Result<()> {
        // The peer would refuse it and drop the link.
        if payload.len() > MAX_FRAME_SIZE {
            return Err(Error::PayloadTooLarge(payload.len()));
        }
        let len = u32::try_from(payload.len()).map_err(|_| Error::PayloadTooLarge(payload.len()))?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&len.to_be_bytes()).await?;
        writer.write_all(payload).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        let mut reader = self.reader.lock().await;
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(Error::PayloadTooLarge(len));
        }

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).await?;
        Ok(Some(payload))
    }
}

/// Connects to the router over TCP.
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

#[async_trait::async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| Error::ConnectionLost(format!("{}:{}: {}", self.host, self.port, e)))?;
        Ok(Box::new(TcpTransport::new(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_frames_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let transport = TcpTransport::new(stream);
            let frame = transport.recv().await.unwrap().unwrap();
            transport.send(&frame).await.unwrap();
        });

        let client = TcpConnector::new("127.0.0.1", port).connect().await.unwrap();
        client.send(b"hello router").await.unwrap();
        assert_eq!(client.recv().await.unwrap().unwrap(), b"hello router");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_frame_is_not_written() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            TcpTransport::new(stream).recv().await.unwrap().unwrap()
        });

        let client = TcpConnector::new("127.0.0.1", port).connect().await.unwrap();
        let oversized = vec![0u8; MAX_FRAME_SIZE + 1];
        assert!(matches!(client.send(&oversized).await, Err(Error::PayloadTooLarge(n)) if n == MAX_FRAME_SIZE + 1));
        client.send(b"next").await.unwrap();
        assert_eq!(server.await.unwrap(), b"next");
    }

    #[tokio::test]
    async fn test_closed_socket_reads_none() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let client = TcpConnector::new("127.0.0.1", port).connect().await.unwrap();
        server.await.unwrap();
        assert!(client.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_lost() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = TcpConnector::new("127.0.0.1", port).connect().await;
        assert!(matches!(result, Err(Error::ConnectionLost(_))));
    }
}
