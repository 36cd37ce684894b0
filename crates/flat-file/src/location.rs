// flat-file/src/location.rs

use crate::{FlatFileError, FlatFileResult};
use std::fmt;

/// Serialized location size in bytes
pub const LOCATION_SIZE: usize = 12;

/// Bytes of the little-endian length prefix in front of every record
pub const LENGTH_PREFIX_SIZE: u32 = 4;

/// Bytes of the CRC-32C trailer behind every record
pub const CHECKSUM_SIZE: u32 = 4;

/// Per-record framing overhead
pub const RECORD_OVERHEAD: u32 = LENGTH_PREFIX_SIZE + CHECKSUM_SIZE;

/// Position of one record inside a flat-file store.
///
/// `data_length` is the payload length only; the on-disk span is
/// [`FlatFileLocation::record_size`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FlatFileLocation {
    pub file_number: u32,
    pub file_offset: u32,
    pub data_length: u32,
}

impl FlatFileLocation {
    pub fn new(file_number: u32, file_offset: u32, data_length: u32) -> Self {
        Self {
            file_number,
            file_offset,
            data_length,
        }
    }

    /// Full on-disk span of the record: length prefix, payload and checksum
    pub fn record_size(&self) -> u64 {
        u64::from(RECORD_OVERHEAD) + u64::from(self.data_length)
    }

    /// Offset one past the last byte of the record
    pub fn end_offset(&self) -> u64 {
        u64::from(self.file_offset) + self.record_size()
    }

    /// Encode as `[file_number][file_offset][data_length]`, little-endian
    pub fn encode(&self) -> [u8; LOCATION_SIZE] {
        let mut bytes = [0u8; LOCATION_SIZE];
        bytes[0..4].copy_from_slice(&self.file_number.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.file_offset.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.data_length.to_le_bytes());
        bytes
    }

    /// Decode a serialized location (returns error if wrong length)
    pub fn decode(bytes: &[u8]) -> FlatFileResult<Self> {
        if bytes.len() != LOCATION_SIZE {
            return Err(FlatFileError::Format(format!(
                "serialized location must be {} bytes, got {}",
                LOCATION_SIZE,
                bytes.len()
            )));
        }

        let field = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

        Ok(Self {
            file_number: field(0),
            file_offset: field(4),
            data_length: field(8),
        })
    }

    /// Compare positions only, ignoring the data length
    pub fn same_position(&self, other: &Self) -> bool {
        self.file_number == other.file_number && self.file_offset == other.file_offset
    }

    /// Whether this position lies strictly after `other`
    pub fn is_after(&self, other: &Self) -> bool {
        (self.file_number, self.file_offset) > (other.file_number, other.file_offset)
    }
}

impl fmt::Display for FlatFileLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "file {} offset {} length {}",
            self.file_number, self.file_offset, self.data_length
        )
    }
}
