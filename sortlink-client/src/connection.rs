//! Connection management.

use crate::error::ClientError;
use crate::reader::FrameReader;
use sortlink_protocol::{Decoder, Frame, TextByteOrder, SIGNATURE_SIZE};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Appliance host name or address.
    pub host: String,
    /// Appliance port.
    pub port: u16,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// Byte order applied to text sections.
    pub text_byte_order: TextByteOrder,
    /// Reject inbound frames with a different signature (off when `None`).
    pub expected_signature: Option<[u8; SIGNATURE_SIZE]>,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(10),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            text_byte_order: TextByteOrder::default(),
            expected_signature: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_text_byte_order(mut self, order: TextByteOrder) -> Self {
        self.text_byte_order = order;
        self
    }

    pub fn with_expected_signature(mut self, signature: [u8; SIGNATURE_SIZE]) -> Self {
        self.expected_signature = Some(signature);
        self
    }

    /// `host:port` form used for connecting and logging.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn decoder(&self) -> Decoder {
        match self.expected_signature {
            Some(signature) => Decoder::new().with_expected_signature(signature),
            None => Decoder::new(),
        }
    }
}

/// A TCP connection to one appliance endpoint. One reader, one writer.
pub struct Connection {
    addr: String,
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    /// Connects to the endpoint described by `config`.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, ClientError> {
        let addr = config.addr();
        tracing::debug!("Connecting to {}...", addr);

        let stream = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await
        .map_err(|_| {
            tracing::debug!("Connection to {} timed out", addr);
            ClientError::ConnectTimeout(addr.clone())
        })?
        .map_err(|source| {
            tracing::debug!("Connection to {} failed: {}", addr, source);
            ClientError::Connect {
                addr: addr.clone(),
                source,
            }
        })?;

        stream.set_nodelay(true).ok();
        tracing::debug!("Connected to {}", addr);

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: FrameReader::new(read_half, config.decoder(), config.read_buffer_size),
            writer: write_half,
            addr,
        })
    }

    /// Peer address as configured.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Writes a complete message.
    pub async fn send(&mut self, message: &[u8]) -> Result<(), ClientError> {
        self.writer.write_all(message).await?;
        tracing::debug!("Sent {} bytes to {}", message.len(), self.addr);
        Ok(())
    }

    /// Reads the next frame. A peer close is [`ClientError::ConnectionClosed`].
    pub async fn next_frame(&mut self) -> Result<Frame, ClientError> {
        self.reader
            .next_frame()
            .await?
            .ok_or(ClientError::ConnectionClosed)
    }

    /// Reads the next frame, mapping a clean peer close to `None`.
    pub async fn try_next_frame(&mut self) -> Result<Option<Frame>, ClientError> {
        self.reader.next_frame().await
    }

    /// Shuts down the write half and drops the socket.
    pub async fn close(mut self) -> Result<(), ClientError> {
        tracing::debug!("Closing connection to {}", self.addr);
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sortlink_protocol::MessageType;
    use tokio::net::TcpListener;

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::new("sorter", 7020);
        assert_eq!(config.addr(), "sorter:7020");
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.text_byte_order, TextByteOrder::Reversed);
        assert!(config.expected_signature.is_none());
    }

    #[test]
    fn test_config_buffer_clamping() {
        let config = ConnectionConfig::new("sorter", 7020).with_read_buffer_size(100);
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config = ConnectionConfig::new("sorter", 7020).with_read_buffer_size(10 * 1024 * 1024);
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = Connection::connect(&ConnectionConfig::new("127.0.0.1", port)).await;
        let err = result.err().unwrap();
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            tokio::io::AsyncReadExt::read_exact(&mut socket, &mut buf)
                .await
                .unwrap();
            let reply = Frame::new(MessageType::Ack).encode().unwrap();
            socket.write_all(&reply).await.unwrap();
            buf
        });

        let mut conn = Connection::connect(&ConnectionConfig::new("127.0.0.1", port))
            .await
            .unwrap();
        conn.send(b"ping").await.unwrap();
        let frame = conn.next_frame().await.unwrap();
        assert_eq!(frame.kind(), MessageType::Ack);

        assert!(matches!(
            conn.next_frame().await,
            Err(ClientError::ConnectionClosed)
        ));
        assert_eq!(&server.await.unwrap(), b"ping");
    }
}
