//! Little-endian primitives for the binary save layout.
//!
//! The save format is a flat concatenation of `u32` words and raw cell
//! bytes, no padding, no framing. Each subsystem encodes and decodes its
//! own block; this module owns the primitives and the decode-failure
//! taxonomy.

use thiserror::Error;

/// Decode failures for snapshot payloads. Loading is all-or-nothing, so
/// these never escape the engine: `Engine::deserialize` escalates them
/// to a panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub(crate) enum SnapshotError {
    /// Payload ended before a field could be read.
    #[error("snapshot truncated at byte offset {offset}")]
    Truncated {
        /// Byte offset at which the read was attempted.
        offset: usize,
    },
    /// Payload continued past the final field.
    #[error("{count} trailing bytes after snapshot payload")]
    TrailingBytes {
        /// Number of unread bytes.
        count: usize,
    },
    /// A field held a value outside its domain.
    #[error("invalid {field} value {value:#x} in snapshot")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Raw value read from the payload.
        value: u32,
    },
}

/// Appends a little-endian `u32` to the payload.
pub(crate) fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Sequential reader over a snapshot payload.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Reads one little-endian `u32`.
    pub(crate) fn take_u32(&mut self) -> Result<u32, SnapshotError> {
        let bytes = self.take_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads `len` raw bytes.
    pub(crate) fn take_bytes(&mut self, len: usize) -> Result<&'a [u8], SnapshotError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(SnapshotError::Truncated { offset: self.pos })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Reads a module `is_init` word, which is always written as 1.
    pub(crate) fn expect_flag(&mut self, field: &'static str) -> Result<(), SnapshotError> {
        let value = self.take_u32()?;
        if value == 1 {
            Ok(())
        } else {
            Err(SnapshotError::InvalidField { field, value })
        }
    }

    /// Asserts the payload has been fully consumed.
    pub(crate) fn finish(self) -> Result<(), SnapshotError> {
        let count = self.buf.len() - self.pos;
        if count == 0 {
            Ok(())
        } else {
            Err(SnapshotError::TrailingBytes { count })
        }
    }
}
