//! Integer, text and bit-field conversions for section payloads.
//!
//! Every integer on the wire is most-significant-byte first. Unsigned wire
//! fields (lengths, section ids, message types) must still fit a signed
//! 32-bit range; anything larger is rejected instead of wrapped.

use crate::error::ProtocolError;

/// Bit position inside the disposition flag register marking a terminal
/// sorting outcome.
pub const FINAL_DISPOSITION_BIT: usize = 5;

/// Byte order applied to text sections before UTF-8 decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextByteOrder {
    /// Reverse the section bytes before decoding, mirroring the integer
    /// conversion. This is what the appliance-facing tooling has always done.
    #[default]
    Reversed,
    /// Decode the bytes in the order they arrived.
    Wire,
}

/// Encodes a signed 32-bit integer most-significant byte first.
pub fn encode_int32(value: i32) -> [u8; 4] {
    value.to_be_bytes()
}

/// Decodes a big-endian signed 32-bit integer from exactly four bytes.
pub fn decode_int32(bytes: &[u8]) -> Result<i32, ProtocolError> {
    let raw: [u8; 4] = bytes
        .try_into()
        .map_err(|_| ProtocolError::InvalidIntegerWidth(bytes.len()))?;
    Ok(i32::from_be_bytes(raw))
}

/// Decodes an unsigned wire field, rejecting values outside the signed
/// 32-bit range.
pub fn decode_field(bytes: &[u8]) -> Result<u32, ProtocolError> {
    let raw: [u8; 4] = bytes
        .try_into()
        .map_err(|_| ProtocolError::InvalidIntegerWidth(bytes.len()))?;
    let value = u32::from_be_bytes(raw);
    if value > i32::MAX as u32 {
        return Err(ProtocolError::IntegerOverflow(value as u64));
    }
    Ok(value)
}

/// Encodes an unsigned wire field (typically a length).
pub fn encode_field(value: usize) -> Result<[u8; 4], ProtocolError> {
    if value > i32::MAX as usize {
        return Err(ProtocolError::IntegerOverflow(value as u64));
    }
    Ok((value as u32).to_be_bytes())
}

/// Decodes a text section.
///
/// Invalid UTF-8 is replaced rather than rejected: text sections are only
/// ever inspected for emptiness or logged.
pub fn decode_text(data: &[u8], order: TextByteOrder) -> String {
    match order {
        TextByteOrder::Reversed => {
            let reversed: Vec<u8> = data.iter().rev().copied().collect();
            String::from_utf8_lossy(&reversed).into_owned()
        }
        TextByteOrder::Wire => String::from_utf8_lossy(data).into_owned(),
    }
}

/// A packed flag register carried in a section.
///
/// The register is read as one big-endian unsigned integer of arbitrary
/// width: bit 0 is the least significant bit of the last byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField<'a> {
    data: &'a [u8],
}

impl<'a> BitField<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Number of addressable bits.
    pub fn width(&self) -> usize {
        self.data.len() * 8
    }

    /// Returns whether `bit` is set. Bits beyond the register read as clear.
    pub fn is_set(&self, bit: usize) -> bool {
        if bit >= self.width() {
            return false;
        }
        let byte = self.data[self.data.len() - 1 - bit / 8];
        byte & (1 << (bit % 8)) != 0
    }

    /// Returns whether the final-disposition flag is set.
    pub fn is_final(&self) -> bool {
        self.is_set(FINAL_DISPOSITION_BIT)
    }
}
