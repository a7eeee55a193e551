//! TLV frame format used on both appliance ports.
//!
//! Frame layout (all integers big-endian):
//!
//! ```text
//! +--------------+-----------+--------------+------------------------+
//! | total_length | signature | message_type | section*               |
//! |   4 bytes    |  6 bytes  |   4 bytes    | total_length - 10 bytes|
//! +--------------+-----------+--------------+------------------------+
//!
//! section:
//! +------------+---------+-------------+
//! | section_id | length  | data        |
//! |  4 bytes   | 4 bytes | length bytes|
//! +------------+---------+-------------+
//! ```
//!
//! `total_length` counts every byte after the length field itself and is the
//! only stop condition for a frame.

use crate::error::ProtocolError;
use crate::message::MessageType;
use crate::wire::{decode_field, encode_field};
use crate::MAX_FRAME_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the leading `total_length` field.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the signature marker.
pub const SIGNATURE_SIZE: usize = 6;

/// Bytes counted by `total_length` before the first section (signature + type).
pub const FRAME_PREAMBLE_SIZE: usize = SIGNATURE_SIZE + 4;

/// Size of a section header (id + length).
pub const SECTION_HEADER_SIZE: usize = 8;

/// Signature written on outbound frames.
pub const SIGNATURE: [u8; SIGNATURE_SIZE] = [0x00, 0x01, 0x53, 0x4C, 0x00, 0x00];

/// One TLV unit inside a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section identifier (not unique within a frame).
    pub id: u32,
    /// Raw section payload.
    pub data: Bytes,
}

impl Section {
    pub fn new(id: u32, data: impl Into<Bytes>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }

    /// Declared length, always equal to the bytes held in `data`.
    pub fn length(&self) -> u32 {
        self.data.len() as u32
    }

    fn encoded_len(&self) -> usize {
        SECTION_HEADER_SIZE + self.data.len()
    }
}

/// A parsed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Declared byte count after the length field.
    pub total_length: u32,
    /// Signature marker, carried through unchecked.
    pub signature: [u8; SIGNATURE_SIZE],
    /// Raw message type selector.
    pub message_type: u32,
    /// Sections in receipt order.
    pub sections: Vec<Section>,
}

impl Frame {
    /// Creates an empty frame with the outbound signature.
    pub fn new(message_type: MessageType) -> Self {
        Self {
            total_length: FRAME_PREAMBLE_SIZE as u32,
            signature: SIGNATURE,
            message_type: message_type.code(),
            sections: Vec::new(),
        }
    }

    /// Appends a section, keeping `total_length` in step.
    pub fn with_section(mut self, id: u32, data: impl Into<Bytes>) -> Self {
        let section = Section::new(id, data);
        self.total_length += section.encoded_len() as u32;
        self.sections.push(section);
        self
    }

    /// Classified message type.
    pub fn kind(&self) -> MessageType {
        MessageType::from_code(self.message_type)
    }

    /// Returns the first section with the given id.
    pub fn section(&self, id: u32) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    /// Returns every section with the given id, in receipt order.
    pub fn sections_with_id(&self, id: u32) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(move |s| s.id == id)
    }

    /// Encodes the frame. `total_length` is recomputed from the sections.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let body_len = FRAME_PREAMBLE_SIZE
            + self
                .sections
                .iter()
                .map(Section::encoded_len)
                .sum::<usize>();
        if body_len > MAX_FRAME_SIZE as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: body_len.min(u32::MAX as usize) as u32,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + body_len);
        buf.put_slice(&encode_field(body_len)?);
        buf.put_slice(&self.signature);
        buf.put_slice(&encode_field(self.message_type as usize)?);
        for section in &self.sections {
            buf.put_slice(&encode_field(section.id as usize)?);
            buf.put_slice(&encode_field(section.data.len())?);
            buf.put_slice(&section.data);
        }

        Ok(buf)
    }

    /// Decodes a frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` until the whole frame has been buffered. A complete
    /// frame is removed from `buf` even when it fails to parse, so bytes of
    /// the next frame are never consumed.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let total_length = decode_field(&buf[..LENGTH_PREFIX_SIZE])?;
        if (total_length as usize) < FRAME_PREAMBLE_SIZE {
            return Err(ProtocolError::FrameTooShort(total_length));
        }
        if total_length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: total_length,
                max: MAX_FRAME_SIZE,
            });
        }

        let frame_len = LENGTH_PREFIX_SIZE + total_length as usize;
        if buf.len() < frame_len {
            return Ok(None);
        }

        let mut body = buf.split_to(frame_len).freeze();
        body.advance(LENGTH_PREFIX_SIZE);
        Self::parse_body(total_length, body).map(Some)
    }

    /// Bytes still missing before the frame at the front of `buf` is complete,
    /// or `None` when not even the length prefix has arrived.
    pub fn missing_bytes(buf: &[u8]) -> Option<usize> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return None;
        }
        let declared = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        Some((LENGTH_PREFIX_SIZE + declared).saturating_sub(buf.len()))
    }

    fn parse_body(total_length: u32, mut body: Bytes) -> Result<Self, ProtocolError> {
        let mut signature = [0u8; SIGNATURE_SIZE];
        body.copy_to_slice(&mut signature);

        let message_type = decode_field(&body[..4])?;
        body.advance(4);

        let mut sections = Vec::new();
        while body.has_remaining() {
            let remaining = body.remaining();
            if remaining < SECTION_HEADER_SIZE {
                return Err(ProtocolError::TruncatedSection { remaining });
            }

            let id = decode_field(&body[..4])?;
            let declared = decode_field(&body[4..8])?;
            body.advance(SECTION_HEADER_SIZE);

            if declared as usize > body.remaining() {
                return Err(ProtocolError::SectionOverflow {
                    id,
                    declared,
                    remaining: body.remaining(),
                });
            }

            let data = body.split_to(declared as usize);
            sections.push(Section { id, data });
        }

        Ok(Self {
            total_length,
            signature,
            message_type,
            sections,
        })
    }
}
