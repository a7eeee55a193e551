//! Message catalogue, outbound request templates and typed inbound views.

use crate::error::ValidationError;
use crate::frame::{Frame, LENGTH_PREFIX_SIZE};
use crate::wire::{decode_text, BitField, TextByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

/// Outbound: directory-info query.
pub const DIRECTORY_INFO_QUERY: u32 = 6009;
/// Outbound: status-alert subscription.
pub const STATUS_ALERT_SUBSCRIBE: u32 = 6012;
/// Outbound: configuration-change request.
pub const CONFIG_CHANGE_REQUEST: u32 = 6013;

/// Text section holding the active directory name in a directory-info reply.
pub const DIRECTORY_NAME_SECTION: u32 = 2;
/// Alert mask section of the status-alert subscription.
pub const ALERT_MASK_SECTION: u32 = 5;
/// Bit-field section carrying the disposition flags of a processed item.
pub const DISPOSITION_FLAGS_SECTION: u32 = 9;
/// Section carrying the requested configuration name.
pub const CONFIG_NAME_SECTION: u32 = 1;

/// Longest configuration name the single-byte length prefix can describe.
pub const MAX_CONFIG_NAME_LEN: usize = u8::MAX as usize;

/// Inbound message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Reply to a directory-info query.
    DirectoryInfoReply,
    /// Informational broadcast.
    Broadcast,
    /// Generic event.
    GenericEvent,
    /// Positive acknowledgement.
    Ack,
    /// Negative acknowledgement.
    Nak,
    /// Event-feed notification for one processed item.
    ItemProcessed,
    /// Anything outside the supported subset.
    Other(u32),
}

impl MessageType {
    pub fn from_code(code: u32) -> Self {
        match code {
            6010 => MessageType::DirectoryInfoReply,
            6011 => MessageType::Broadcast,
            6004 => MessageType::GenericEvent,
            6015 => MessageType::Ack,
            6016 => MessageType::Nak,
            6101 => MessageType::ItemProcessed,
            other => MessageType::Other(other),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            MessageType::DirectoryInfoReply => 6010,
            MessageType::Broadcast => 6011,
            MessageType::GenericEvent => 6004,
            MessageType::Ack => 6015,
            MessageType::Nak => 6016,
            MessageType::ItemProcessed => 6101,
            MessageType::Other(code) => *code,
        }
    }
}

// Byte templates. Fields are big-endian; the signature occupies bytes 4..10.

const DIRECTORY_INFO_TEMPLATE: [u8; 14] = [
    0x00, 0x00, 0x00, 0x0A, // total length
    0x00, 0x01, 0x53, 0x4C, 0x00, 0x00, // signature
    0x00, 0x00, 0x17, 0x79, // 6009
];

const STATUS_ALERT_TEMPLATE: [u8; 26] = [
    0x00, 0x00, 0x00, 0x16, // total length
    0x00, 0x01, 0x53, 0x4C, 0x00, 0x00, // signature
    0x00, 0x00, 0x17, 0x7C, // 6012
    0x00, 0x00, 0x00, 0x05, // alert mask section
    0x00, 0x00, 0x00, 0x04, // section length
    0x00, 0x00, 0xFF, 0xFF, // all alert classes
];

const CONFIG_CHANGE_HEADER: [u8; 22] = [
    0x00, 0x00, 0x00, 0x00, // total length, patched
    0x00, 0x01, 0x53, 0x4C, 0x00, 0x00, // signature
    0x00, 0x00, 0x17, 0x7D, // 6013
    0x00, 0x00, 0x00, 0x01, // config name section
    0x00, 0x00, 0x00, 0x00, // section length, patched
];

const NAME_SECTION_LENGTH_OFFSET: usize = 18;

/// Directory-info query, sent verbatim.
pub fn directory_info_request() -> Bytes {
    Bytes::from_static(&DIRECTORY_INFO_TEMPLATE)
}

/// Status-alert subscription, sent verbatim.
pub fn status_alert_request() -> Bytes {
    Bytes::from_static(&STATUS_ALERT_TEMPLATE)
}

/// Configuration-change request for `name`.
///
/// The name section is a one-byte length followed by the UTF-8 name. Both the
/// frame length and the section length are patched once the message is built.
pub fn config_change_request(name: &str) -> Result<Bytes, ValidationError> {
    let encoded = name.as_bytes();
    if encoded.len() > MAX_CONFIG_NAME_LEN {
        return Err(ValidationError::NameTooLong {
            len: encoded.len(),
            max: MAX_CONFIG_NAME_LEN,
        });
    }

    let mut buf = BytesMut::with_capacity(CONFIG_CHANGE_HEADER.len() + 1 + encoded.len());
    buf.put_slice(&CONFIG_CHANGE_HEADER);
    buf.put_u8(encoded.len() as u8);
    buf.put_slice(encoded);

    let total_length = (buf.len() - LENGTH_PREFIX_SIZE) as u32;
    let section_length = (buf.len() - CONFIG_CHANGE_HEADER.len()) as u32;
    buf[..LENGTH_PREFIX_SIZE].copy_from_slice(&total_length.to_be_bytes());
    buf[NAME_SECTION_LENGTH_OFFSET..NAME_SECTION_LENGTH_OFFSET + 4]
        .copy_from_slice(&section_length.to_be_bytes());

    Ok(buf.freeze())
}

/// Directory state reported by a directory-info reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryInfo {
    /// Active directory name; empty when the appliance reports none.
    pub directory: String,
}

impl DirectoryInfo {
    /// Reads a directory-info reply. Returns `None` for any other frame.
    pub fn from_frame(frame: &Frame, order: TextByteOrder) -> Option<Self> {
        if frame.kind() != MessageType::DirectoryInfoReply {
            return None;
        }
        let directory = frame
            .section(DIRECTORY_NAME_SECTION)
            .map(|s| decode_text(&s.data, order))
            .unwrap_or_default();
        Some(Self { directory })
    }

    /// Whether the appliance is still on its known-good configuration.
    pub fn is_on_known_configuration(&self) -> bool {
        !self.directory.is_empty()
    }
}

/// One processed item reported on the event feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemProcessed {
    /// Whether any disposition section has the final-disposition bit set.
    pub finalized: bool,
}

impl ItemProcessed {
    /// Reads an item-processed event. Returns `None` for any other frame.
    pub fn from_frame(frame: &Frame) -> Option<Self> {
        if frame.kind() != MessageType::ItemProcessed {
            return None;
        }
        let finalized = frame
            .sections_with_id(DISPOSITION_FLAGS_SECTION)
            .any(|s| BitField::new(&s.data).is_final());
        Some(Self { finalized })
    }
}
