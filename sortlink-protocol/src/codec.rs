//! Buffering decoder for frames arriving in arbitrary chunks.

use crate::error::ProtocolError;
use crate::frame::{Frame, SIGNATURE_SIZE};
use bytes::{Bytes, BytesMut};

/// Accumulates socket reads and yields complete frames.
pub struct Decoder {
    buffer: BytesMut,
    expected_signature: Option<[u8; SIGNATURE_SIZE]>,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            expected_signature: None,
        }
    }

    /// Rejects frames whose signature differs from `signature`.
    pub fn with_expected_signature(mut self, signature: [u8; SIGNATURE_SIZE]) -> Self {
        self.expected_signature = Some(signature);
        self
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Appends bytes to the internal buffer.
    pub fn extend_bytes(&mut self, data: Bytes) {
        self.buffer.extend_from_slice(&data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        let frame = match Frame::decode(&mut self.buffer)? {
            Some(frame) => frame,
            None => return Ok(None),
        };

        if let Some(expected) = self.expected_signature {
            if frame.signature != expected {
                return Err(ProtocolError::InvalidSignature {
                    expected,
                    actual: frame.signature,
                });
            }
        }

        Ok(Some(frame))
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes still needed to complete the frame at the front of the buffer.
    pub fn missing(&self) -> Option<usize> {
        Frame::missing_bytes(&self.buffer)
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
