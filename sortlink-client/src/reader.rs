//! Incremental frame reader over an async byte stream.

use crate::error::ClientError;
use sortlink_protocol::{Decoder, Frame};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Reads whole frames from a stream whose reads may return any number of
/// bytes.
///
/// `next_frame` is cancellation safe: bytes are only moved into the decoder
/// after a read completes, so dropping the future loses nothing.
pub struct FrameReader<R> {
    reader: R,
    decoder: Decoder,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, decoder: Decoder, read_buffer_size: usize) -> Self {
        Self {
            reader,
            decoder,
            buf: vec![0u8; read_buffer_size.max(1)],
        }
    }

    /// Returns the next frame, or `None` when the peer closed the stream on a
    /// frame boundary. A close in the middle of a frame is
    /// [`ClientError::ConnectionClosed`].
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, ClientError> {
        loop {
            if let Some(frame) = self.decoder.decode_frame()? {
                tracing::trace!(
                    "decoded frame type={} sections={}",
                    frame.message_type,
                    frame.sections.len()
                );
                return Ok(Some(frame));
            }

            let n = self.reader.read(&mut self.buf).await?;
            if n == 0 {
                let buffered = self.decoder.buffered();
                if buffered == 0 {
                    return Ok(None);
                }
                tracing::debug!(
                    "stream ended mid-frame ({} bytes buffered, {:?} missing)",
                    buffered,
                    self.decoder.missing()
                );
                return Err(ClientError::ConnectionClosed);
            }

            tracing::trace!("read {} bytes", n);
            self.decoder.extend(&self.buf[..n]);
        }
    }

    /// Returns the number of bytes read but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.decoder.buffered()
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}
