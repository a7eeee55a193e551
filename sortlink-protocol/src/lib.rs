//! # sortlink-protocol
//!
//! Wire protocol implementation for the sorter control and event-feed ports.
//!
//! This crate provides:
//! - Big-endian integer, text and bit-field decoding for section payloads
//! - Length-prefixed TLV framing, tolerant of partial arrival
//! - The catalogue of known message types
//! - Outbound request templates (directory info, status alerts, config change)

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod wire;

pub use codec::Decoder;
pub use error::{ProtocolError, ValidationError};
pub use frame::{
    Frame, Section, FRAME_PREAMBLE_SIZE, LENGTH_PREFIX_SIZE, SECTION_HEADER_SIZE, SIGNATURE,
    SIGNATURE_SIZE,
};
pub use message::{DirectoryInfo, ItemProcessed, MessageType};
pub use wire::{BitField, TextByteOrder, FINAL_DISPOSITION_BIT};

/// Default port of the appliance control endpoint.
pub const DEFAULT_CONTROL_PORT: u16 = 7020;

/// Default port of the appliance event-feed endpoint.
pub const DEFAULT_FEED_PORT: u16 = 7021;

/// Maximum accepted frame size (16 MiB), measured as the declared total length.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;
