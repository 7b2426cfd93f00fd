//! Growable buffer for building little-endian records.

use zerocopy::{Immutable, IntoBytes};

use crate::{le, Result};

/// Appends little-endian values to an owned buffer.
///
/// Besides appending, previously written fields can be patched in place,
/// which is how headers get their sizes filled in once the payload length is
/// known.
#[derive(Debug, Clone, Default)]
pub struct BinaryWriter {
    data: Vec<u8>,
}

impl BinaryWriter {
    /// Create an empty writer.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty writer with room for `capacity` bytes.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check whether nothing has been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the written bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Consume the writer, returning the buffer.
    #[inline]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    #[inline]
    pub fn put_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    #[inline]
    pub fn put_u16(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub fn put_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub fn put_u64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Append a zerocopy struct in its in-memory (little-endian) layout.
    #[inline]
    pub fn put_struct<T: IntoBytes + Immutable>(&mut self, value: &T) {
        self.data.extend_from_slice(value.as_bytes());
    }

    /// Overwrite a u16 written earlier at `offset`.
    #[inline]
    pub fn patch_u16(&mut self, offset: usize, value: u16) -> Result<()> {
        le::write_u16(&mut self.data, offset, value)
    }

    /// Overwrite a u32 written earlier at `offset`.
    #[inline]
    pub fn patch_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        le::write_u32(&mut self.data, offset, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_patch() {
        let mut writer = BinaryWriter::new();
        writer.put_u32(0x04034b50);
        writer.put_u16(0);
        writer.put_u64(1);
        writer.patch_u16(4, 0xBEEF).unwrap();

        assert_eq!(
            writer.as_slice(),
            &[0x50, 0x4b, 0x03, 0x04, 0xEF, 0xBE, 1, 0, 0, 0, 0, 0, 0, 0]
        );
        assert!(writer.patch_u32(12, 0).is_err());
    }
}
