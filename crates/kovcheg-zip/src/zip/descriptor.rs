//! Data Descriptor records.
//!
//! A data descriptor trails the content of an entry whose CRC and sizes were
//! unknown when its local header was written. Its signature is optional, and
//! the sizes are 8 bytes wide for ZIP64 entries, so it is not a fixed-size
//! struct like the other records.

use kovcheg_common::{le, BinaryWriter};

use crate::Result;

/// Trailing CRC and sizes of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    /// CRC-32 of uncompressed data
    pub crc32: u32,
    /// Compressed size
    pub compressed_size: u64,
    /// Uncompressed size
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    /// Data descriptor signature as u32.
    pub const SIGNATURE: u32 = 0x08074b50;

    /// Largest possible encoded size (signature plus 8-byte sizes).
    pub const MAX_SIZE: usize = 24;

    /// Encode with signature, using 8-byte sizes when `zip64` is set.
    pub fn encode(&self, zip64: bool) -> Vec<u8> {
        let mut writer = BinaryWriter::with_capacity(Self::MAX_SIZE);
        writer.put_u32(Self::SIGNATURE);
        writer.put_u32(self.crc32);
        if zip64 {
            writer.put_u64(self.compressed_size);
            writer.put_u64(self.uncompressed_size);
        } else {
            writer.put_u32(self.compressed_size as u32);
            writer.put_u32(self.uncompressed_size as u32);
        }
        writer.into_inner()
    }

    /// Extract the CRC from bytes starting where the descriptor starts.
    ///
    /// The signature is optional, so the first word is either the signature
    /// or already the CRC. A CRC that happens to equal the signature is
    /// indistinguishable; like other readers, this treats it as a signature.
    pub fn read_crc(bytes: &[u8]) -> Result<u32> {
        let first = le::read_u32(bytes, 0)?;
        if first == Self::SIGNATURE {
            Ok(le::read_u32(bytes, 4)?)
        } else {
            Ok(first)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_widths() {
        let dd = DataDescriptor {
            crc32: 0xDEADBEEF,
            compressed_size: 5,
            uncompressed_size: 7,
        };
        assert_eq!(dd.encode(false).len(), 16);
        assert_eq!(dd.encode(true).len(), 24);
    }

    #[test]
    fn test_read_crc_with_and_without_signature() {
        let dd = DataDescriptor {
            crc32: 0x11223344,
            compressed_size: 1,
            uncompressed_size: 1,
        };
        let signed = dd.encode(false);
        assert_eq!(DataDescriptor::read_crc(&signed).unwrap(), 0x11223344);
        assert_eq!(DataDescriptor::read_crc(&signed[4..]).unwrap(), 0x11223344);
        assert!(DataDescriptor::read_crc(&signed[..6]).is_err());
    }
}
