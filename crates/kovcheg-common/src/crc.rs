//! CRC-32 hashing utilities.
//!
//! ZIP uses the IEEE 802.3 polynomial for its per-entry checksums. The
//! [`Crc32`] type is a running checksum for streamed content.

/// Compute the CRC-32 of a byte slice.
#[inline]
pub fn hash_bytes(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Running CRC-32 over streamed data.
#[derive(Debug, Clone, Default)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
    count: u64,
}

impl Crc32 {
    /// Start a new checksum.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more data into the checksum.
    #[inline]
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.count += data.len() as u64;
    }

    /// Number of bytes hashed so far.
    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Current checksum value; hashing may continue afterwards.
    #[inline]
    pub fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}
