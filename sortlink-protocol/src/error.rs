//! Protocol and validation error types.

use thiserror::Error;

/// Protocol-level errors. Any of these is fatal to the current session.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("integer overflow: wire value {0:#x} does not fit a signed 32-bit field")]
    IntegerOverflow(u64),

    #[error("invalid integer width: expected 4 bytes, got {0}")]
    InvalidIntegerWidth(usize),

    #[error("frame too short: declared length {0} is below the 10-byte preamble")]
    FrameTooShort(u32),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("invalid signature: expected {expected:02x?}, got {actual:02x?}")]
    InvalidSignature { expected: [u8; 6], actual: [u8; 6] },

    #[error("truncated section header: {remaining} bytes left in frame")]
    TruncatedSection { remaining: usize },

    #[error("section {id} declares {declared} bytes but only {remaining} remain in frame")]
    SectionOverflow {
        id: u32,
        declared: u32,
        remaining: usize,
    },

    #[error("unexpected response sequence after {probes} directory probes")]
    UnexpectedSequence { probes: u32 },
}

/// Caller-supplied input rejected before any bytes are sent.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("configuration name is {len} bytes (max {max})")]
    NameTooLong { len: usize, max: usize },
}
