//! ZIP format structures.
//!
//! This module contains the fixed-size parts of every ZIP record, including
//! the ZIP64 extensions. Each struct excludes its 4-byte signature, which is
//! read and written separately, and stores its fields little-endian so the
//! structs can be copied straight to and from disk.

pub mod central_dir;
mod descriptor;
mod eocd;
mod local;

pub use central_dir::CentralDirectoryHeader;
pub use descriptor::DataDescriptor;
pub use eocd::{Eocd64Locator, Eocd64Record, EocdRecord};
pub use local::LocalFileHeader;

/// Marker method recorded for WinZip AES entries; the true method lives in
/// the AES extra field.
pub const WINZIP_AES_METHOD: u16 = 99;

/// Compression methods supported by this codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum CompressionMethod {
    /// No compression (stored).
    Stored = 0,
    /// DEFLATE compression.
    #[default]
    Deflated = 8,
    /// BZIP2 compression.
    Bzip2 = 12,
}

impl CompressionMethod {
    /// Raw method code.
    #[inline]
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Minimum "version needed to extract" for this method.
    pub(crate) fn version_needed(self) -> u16 {
        match self {
            Self::Stored => 10,
            Self::Deflated => 20,
            Self::Bzip2 => 46,
        }
    }
}

impl TryFrom<u16> for CompressionMethod {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Stored),
            8 => Ok(Self::Deflated),
            12 => Ok(Self::Bzip2),
            other => Err(other),
        }
    }
}

/// General purpose bit flags.
pub mod flags {
    /// Content is encrypted.
    pub const ENCRYPTED: u16 = 1 << 0;
    /// CRC and sizes follow the content in a data descriptor.
    pub const DATA_DESCRIPTOR: u16 = 1 << 3;
    /// Name and comment are UTF-8 (language encoding flag).
    pub const UTF8: u16 = 1 << 11;
}

/// Version needed to extract an entry with ZIP64 fields.
pub(crate) const ZIP64_VERSION: u16 = 45;
/// Version needed to extract a WinZip AES entry.
pub(crate) const WINZIP_AES_VERSION: u16 = 51;
/// Specification version this codec writes as "version made by".
pub(crate) const VERSION_MADE_BY: u16 = 63;
