//! ZIP archive entry.

use std::time::SystemTime;

use kovcheg_common::uint::UINT32_MAX;

use crate::dostime;
use crate::extra::{ExtraField, ExtraFields, WinZipAesInfo, Zip64Info};
use crate::zip::central_dir::extra_field;
use crate::zip::{flags, CompressionMethod, WINZIP_AES_METHOD};
use crate::{Error, Result};

/// Host system recorded in "version made by".
pub mod platform {
    pub const FAT: u8 = 0;
    pub const UNIX: u8 = 3;
    pub const NTFS: u8 = 10;

    /// Platform of the running system.
    pub fn current() -> u8 {
        if cfg!(windows) {
            FAT
        } else {
            UNIX
        }
    }
}

/// Metadata of one archive member.
///
/// Numeric fields are `Option`s: `None` means unknown, which is distinct from
/// zero. The writer fills unknown values in as it learns them, and an entry
/// whose sizes are still unknown when the archive is finished is left out of
/// the central directory.
///
/// For WinZip AES entries `method` is the real compression method; the
/// marker method 99 only exists on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    name: String,
    platform: Option<u8>,
    flags: u16,
    method: Option<u16>,
    dos_time: Option<u32>,
    crc: Option<u32>,
    compressed_size: Option<u64>,
    size: Option<u64>,
    offset: Option<u64>,
    internal_attributes: u16,
    external_attributes: u32,
    extra: ExtraFields,
    comment: Option<String>,
}

impl ZipEntry {
    /// Create an entry with every numeric field unknown.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            platform: None,
            flags: 0,
            method: None,
            dos_time: None,
            crc: None,
            compressed_size: None,
            size: None,
            offset: None,
            internal_attributes: 0,
            external_attributes: 0,
            extra: ExtraFields::new(),
            comment: None,
        }
    }

    /// Copy all metadata under a new name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if this entry represents a directory.
    #[inline]
    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }

    #[inline]
    pub fn platform(&self) -> Option<u8> {
        self.platform
    }

    pub fn set_platform(&mut self, platform: impl Into<Option<u8>>) {
        self.platform = platform.into();
    }

    /// General purpose bit flags.
    #[inline]
    pub fn general_flags(&self) -> u16 {
        self.flags
    }

    pub fn set_general_flags(&mut self, flags: u16) {
        self.flags = flags;
    }

    fn set_flag(&mut self, mask: u16, on: bool) {
        if on {
            self.flags |= mask;
        } else {
            self.flags &= !mask;
        }
    }

    #[inline]
    pub fn is_encrypted(&self) -> bool {
        self.flags & flags::ENCRYPTED != 0
    }

    /// Request encryption on write. Clearing it also drops the AES field.
    pub fn set_encrypted(&mut self, encrypted: bool) {
        self.set_flag(flags::ENCRYPTED, encrypted);
        if !encrypted {
            self.extra.remove(extra_field::WINZIP_AES);
        }
    }

    #[inline]
    pub fn has_data_descriptor(&self) -> bool {
        self.flags & flags::DATA_DESCRIPTOR != 0
    }

    pub fn set_data_descriptor(&mut self, on: bool) {
        self.set_flag(flags::DATA_DESCRIPTOR, on);
    }

    #[inline]
    pub fn is_utf8(&self) -> bool {
        self.flags & flags::UTF8 != 0
    }

    pub fn set_utf8(&mut self, on: bool) {
        self.set_flag(flags::UTF8, on);
    }

    /// Compression method code, before any encryption.
    #[inline]
    pub fn method(&self) -> Option<u16> {
        self.method
    }

    pub fn set_method(&mut self, method: impl Into<Option<u16>>) {
        self.method = method.into();
    }

    /// The method as a supported [`CompressionMethod`].
    pub fn compression(&self) -> Option<CompressionMethod> {
        self.method.and_then(|m| CompressionMethod::try_from(m).ok())
    }

    pub fn set_compression(&mut self, method: CompressionMethod) {
        self.method = Some(method.code());
    }

    /// Method code as recorded in headers.
    pub(crate) fn header_method(&self) -> u16 {
        if self.is_encrypted() && self.aes_info().is_some() {
            WINZIP_AES_METHOD
        } else {
            self.method.unwrap_or(0)
        }
    }

    #[inline]
    pub fn dos_time(&self) -> Option<u32> {
        self.dos_time
    }

    pub fn set_dos_time(&mut self, dos_time: impl Into<Option<u32>>) {
        self.dos_time = dos_time.into();
    }

    /// Modification time in milliseconds since the Unix epoch, two second
    /// resolution.
    pub fn time(&self) -> Option<i64> {
        self.dos_time.and_then(dostime::dos_to_millis)
    }

    /// Set the modification time; rounded up to two seconds and clamped to
    /// 1980..=2107.
    pub fn set_time(&mut self, millis: impl Into<Option<i64>>) {
        self.dos_time = millis.into().map(dostime::millis_to_dos);
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.dos_time.and_then(dostime::dos_to_system_time)
    }

    #[inline]
    pub fn crc(&self) -> Option<u32> {
        self.crc
    }

    pub fn set_crc(&mut self, crc: impl Into<Option<u32>>) {
        self.crc = crc.into();
    }

    #[inline]
    pub fn compressed_size(&self) -> Option<u64> {
        self.compressed_size
    }

    pub fn set_compressed_size(&mut self, size: impl Into<Option<u64>>) {
        self.compressed_size = size.into();
    }

    /// Uncompressed size.
    #[inline]
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn set_size(&mut self, size: impl Into<Option<u64>>) {
        self.size = size.into();
    }

    /// Offset of the local file header as recorded in the central directory.
    #[inline]
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn set_offset(&mut self, offset: impl Into<Option<u64>>) {
        self.offset = offset.into();
    }

    #[inline]
    pub fn internal_attributes(&self) -> u16 {
        self.internal_attributes
    }

    pub fn set_internal_attributes(&mut self, attributes: u16) {
        self.internal_attributes = attributes;
    }

    #[inline]
    pub fn external_attributes(&self) -> u32 {
        self.external_attributes
    }

    pub fn set_external_attributes(&mut self, attributes: u32) {
        self.external_attributes = attributes;
    }

    /// Unix mode bits, if the entry was made on a Unix host.
    pub fn unix_mode(&self) -> Option<u32> {
        (self.platform == Some(platform::UNIX)).then_some(self.external_attributes >> 16)
    }

    pub fn set_unix_mode(&mut self, mode: u32) {
        self.platform = Some(platform::UNIX);
        self.external_attributes = (mode << 16) | (self.external_attributes & 0xFFFF);
    }

    #[inline]
    pub fn extra(&self) -> &ExtraFields {
        &self.extra
    }

    pub fn extra_mut(&mut self) -> &mut ExtraFields {
        &mut self.extra
    }

    pub fn set_extra(&mut self, extra: ExtraFields) {
        self.extra = extra;
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn set_comment(&mut self, comment: impl Into<Option<String>>) {
        self.comment = comment.into();
    }

    /// WinZip AES parameters, if present.
    pub fn aes_info(&self) -> Option<&WinZipAesInfo> {
        self.extra.winzip_aes()
    }

    pub(crate) fn set_aes_info(&mut self, info: WinZipAesInfo) {
        self.extra.insert(ExtraField::WinZipAes(info));
    }

    /// Resolve 32-bit header values, pulling overflowed ones from the ZIP64
    /// field in the order size, compressed size, offset.
    pub(crate) fn resolve_sizes(
        &mut self,
        size: u32,
        compressed_size: u32,
        offset: Option<u32>,
    ) -> Result<()> {
        let mut next = 0;
        let mut take = |value: u32, field: &'static str| -> Result<u64> {
            if u64::from(value) != UINT32_MAX {
                return Ok(u64::from(value));
            }
            let resolved = self
                .extra
                .zip64()
                .and_then(|info| info.value(next))
                .ok_or_else(|| {
                    Error::malformed("ZIP64 extra field", format!("missing {field}"))
                })?;
            next += 1;
            Ok(resolved)
        };

        let size = take(size, "uncompressed size")?;
        let compressed_size = take(compressed_size, "compressed size")?;
        let offset = offset.map(|o| take(o, "local header offset")).transpose()?;

        self.size = Some(size);
        self.compressed_size = Some(compressed_size);
        if offset.is_some() {
            self.offset = offset;
        }
        Ok(())
    }

    /// Values for a synthesized ZIP64 field, in field order.
    ///
    /// Includes the values that do not fit 32 bits, or all of them when
    /// `force` is set. Unknown values encode as zero.
    pub(crate) fn zip64_values(&self, force: bool, with_offset: bool) -> Zip64Layout {
        let needs = |value: Option<u64>| force || value.is_some_and(|v| v >= UINT32_MAX);
        let mut layout = Zip64Layout::default();
        if needs(self.size) {
            layout.size = true;
            layout.values.push(self.size.unwrap_or(0));
        }
        if needs(self.compressed_size) {
            layout.compressed_size = true;
            layout.values.push(self.compressed_size.unwrap_or(0));
        }
        if with_offset && needs(self.offset) {
            layout.offset = true;
            layout.values.push(self.offset.unwrap_or(0));
        }
        layout
    }

    /// Extra field bytes with any stored ZIP64 field replaced by `zip64`.
    pub(crate) fn encoded_extra(&self, zip64: &Zip64Layout) -> Vec<u8> {
        let mut extra = self.extra.clone();
        extra.remove(extra_field::ZIP64);
        if !zip64.values.is_empty() {
            extra.insert(ExtraField::Zip64(Zip64Info::from_values(&zip64.values)));
        }
        extra.to_bytes()
    }
}

/// Which header fields moved into a ZIP64 extra field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Zip64Layout {
    pub size: bool,
    pub compressed_size: bool,
    pub offset: bool,
    pub values: Vec<u64>,
}

impl Zip64Layout {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Creates entries for names met while reading or writing.
pub trait EntryFactory: Send + Sync {
    fn new_entry(&self, name: String) -> ZipEntry;
}

/// Creates plain [`ZipEntry`] values.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEntryFactory;

impl EntryFactory for DefaultEntryFactory {
    fn new_entry(&self, name: String) -> ZipEntry {
        ZipEntry::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{AesVendorVersion, KeyStrength};

    #[test]
    fn test_unknown_is_not_zero() {
        let mut entry = ZipEntry::new("a.txt");
        assert_eq!(entry.size(), None);
        entry.set_size(0);
        assert_eq!(entry.size(), Some(0));
        entry.set_size(None);
        assert_eq!(entry.size(), None);

        entry.set_crc(7);
        entry.set_dos_time(dostime::MIN_DOS_TIME);
        entry.set_offset(0);
        entry.set_crc(None);
        entry.set_dos_time(None);
        entry.set_offset(None);
        assert_eq!(entry.crc(), None);
        assert_eq!(entry.offset(), None);
        assert_eq!(entry.dos_time(), None);
        assert_eq!(entry.time(), None);
    }

    #[test]
    fn test_flag_helpers() {
        let mut entry = ZipEntry::new("a");
        entry.set_encrypted(true);
        entry.set_data_descriptor(true);
        entry.set_utf8(true);
        assert_eq!(entry.general_flags(), 0x0809);
        entry.set_data_descriptor(false);
        assert_eq!(entry.general_flags(), 0x0801);
        assert!(entry.is_encrypted() && entry.is_utf8());
    }

    #[test]
    fn test_time_round_trip() {
        let mut entry = ZipEntry::new("a");
        entry.set_time(1_709_214_331_000);
        assert_eq!(entry.time(), Some(1_709_214_332_000));
        entry.set_time(None);
        assert_eq!(entry.time(), None);
    }

    #[test]
    fn test_resolve_only_overflowed_fields() {
        let mut entry = ZipEntry::new("big");
        entry
            .extra_mut()
            .insert(ExtraField::Zip64(Zip64Info::from_values(&[
                0x1_2345_6789,
                0x2_0000_0000,
            ])));
        // size overflowed, csize did not, offset overflowed
        entry.resolve_sizes(u32::MAX, 1000, Some(u32::MAX)).unwrap();
        assert_eq!(entry.size(), Some(0x1_2345_6789));
        assert_eq!(entry.compressed_size(), Some(1000));
        assert_eq!(entry.offset(), Some(0x2_0000_0000));
    }

    #[test]
    fn test_resolve_missing_zip64_value() {
        let mut entry = ZipEntry::new("big");
        let err = entry.resolve_sizes(u32::MAX, 0, None).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
    }

    #[test]
    fn test_zip64_subset() {
        let mut entry = ZipEntry::new("big");
        entry.set_size(0x1_0000_0000);
        entry.set_compressed_size(10);
        entry.set_offset(20);
        let layout = entry.zip64_values(false, true);
        assert!(layout.size && !layout.compressed_size && !layout.offset);
        assert_eq!(layout.values, vec![0x1_0000_0000]);

        let forced = entry.zip64_values(true, true);
        assert_eq!(forced.values, vec![0x1_0000_0000, 10, 20]);

        entry.set_size(5);
        assert!(entry.zip64_values(false, true).is_empty());
        assert!(entry.encoded_extra(&entry.zip64_values(false, true)).is_empty());
    }

    #[test]
    fn test_header_method_for_aes() {
        let mut entry = ZipEntry::new("secret");
        entry.set_compression(CompressionMethod::Deflated);
        assert_eq!(entry.header_method(), 8);
        entry.set_encrypted(true);
        entry.set_aes_info(WinZipAesInfo {
            vendor_version: AesVendorVersion::Ae1,
            key_strength: KeyStrength::Aes128,
            method: 8,
        });
        assert_eq!(entry.header_method(), WINZIP_AES_METHOD);
        assert_eq!(entry.compression(), Some(CompressionMethod::Deflated));
        entry.set_encrypted(false);
        assert!(entry.aes_info().is_none());
    }

    #[test]
    fn test_unix_mode() {
        let mut entry = ZipEntry::new("bin/tool");
        assert_eq!(entry.unix_mode(), None);
        entry.set_unix_mode(0o100755);
        assert_eq!(entry.unix_mode(), Some(0o100755));
    }
}
