//! End of Central Directory (EOCD) structures.

use zerocopy::byteorder::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// End of Central Directory Record (without signature).
///
/// This is the standard ZIP EOCD record found at the end of the archive.
/// The 4-byte signature (0x06054b50) is read separately before this struct.
/// For ZIP64 archives, some fields will contain 0xFFFF or 0xFFFFFFFF
/// to indicate that the actual values are in the ZIP64 EOCD record.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct EocdRecord {
    /// Number of this disk
    pub disk_number: U16,
    /// Disk where central directory starts
    pub central_dir_disk: U16,
    /// Number of central directory records on this disk
    pub central_dir_count_disk: U16,
    /// Total number of central directory records
    pub central_dir_count_total: U16,
    /// Size of central directory (bytes)
    pub central_dir_size: U32,
    /// Offset of start of central directory
    pub central_dir_offset: U32,
    /// Comment length
    pub comment_length: U16,
}

impl EocdRecord {
    /// EOCD signature bytes.
    pub const MAGIC: [u8; 4] = [0x50, 0x4b, 0x05, 0x06];

    /// EOCD signature as u32.
    pub const SIGNATURE: u32 = 0x06054b50;

    /// Size of the record including its signature, excluding the comment.
    pub const SIZE: usize = 4 + std::mem::size_of::<Self>();

    /// Check if any field carries a ZIP64 sentinel.
    pub fn is_zip64(&self) -> bool {
        self.central_dir_count_total.get() == 0xFFFF
            || self.central_dir_offset.get() == 0xFFFFFFFF
            || self.central_dir_size.get() == 0xFFFFFFFF
    }
}

/// ZIP64 End of Central Directory Locator (without signature).
///
/// This record points to the ZIP64 EOCD record.
/// The 4-byte signature (0x07064b50) is read separately before this struct.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct Eocd64Locator {
    /// Disk number containing ZIP64 EOCD
    pub zip64_eocd_disk: U32,
    /// Offset of ZIP64 EOCD record
    pub zip64_eocd_offset: U64,
    /// Total number of disks
    pub total_disks: U32,
}

impl Eocd64Locator {
    /// ZIP64 EOCD Locator signature bytes.
    pub const MAGIC: [u8; 4] = [0x50, 0x4b, 0x06, 0x07];

    /// ZIP64 EOCD Locator signature as u32.
    pub const SIGNATURE: u32 = 0x07064b50;

    /// Size of the locator including its signature.
    pub const SIZE: usize = 4 + std::mem::size_of::<Self>();
}

/// ZIP64 End of Central Directory Record (without signature).
///
/// The 4-byte signature (0x06064b50) is read separately before this struct.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct Eocd64Record {
    /// Size of this record (not including signature or this field)
    pub record_size: U64,
    /// Version made by
    pub version_made_by: U16,
    /// Version needed to extract
    pub version_needed: U16,
    /// This disk number
    pub disk_number: U32,
    /// Disk where central directory starts
    pub central_dir_disk: U32,
    /// Number of central directory records on this disk
    pub central_dir_count_disk: U64,
    /// Total number of central directory records
    pub central_dir_count_total: U64,
    /// Size of central directory (bytes)
    pub central_dir_size: U64,
    /// Offset of start of central directory
    pub central_dir_offset: U64,
}

impl Eocd64Record {
    /// ZIP64 EOCD signature bytes.
    pub const MAGIC: [u8; 4] = [0x50, 0x4b, 0x06, 0x06];

    /// ZIP64 EOCD signature as u32.
    pub const SIGNATURE: u32 = 0x06064b50;

    /// Size of the record including its signature, without extensible data.
    pub const SIZE: usize = 4 + std::mem::size_of::<Self>();

    /// Value of `record_size` for a record without extensible data.
    pub const RECORD_SIZE: u64 = (std::mem::size_of::<Self>() - 8) as u64;
}
