//! Central directory location and parsing.
//!
//! The end of central directory record is found by scanning backwards from
//! the end of the source. From there a ZIP64 locator is probed, and the
//! central directory is parsed forward. Archives with a preamble whose
//! recorded offsets ignore it are detected from the gap between where the
//! central directory is and where it claims to be.

use indexmap::IndexMap;
use kovcheg_common::{BinaryReader, Charset};
use memchr::memmem;
use tracing::{debug, warn};

use crate::config::{Postamble, ReaderConfig};
use crate::entry::ZipEntry;
use crate::extra::ExtraFields;
use crate::mapper::OffsetMapper;
use crate::source::ReadAt;
use crate::zip::{
    flags, CentralDirectoryHeader, Eocd64Locator, Eocd64Record, EocdRecord, WINZIP_AES_METHOD,
};
use crate::{Error, Result};

/// Largest archive comment.
pub const MAX_COMMENT_LENGTH: usize = u16::MAX as usize;

/// Bytes read per step of the backward scan.
const SCAN_CHUNK: usize = 64 * 1024;

/// Signature of the optional digital signature record that may close the
/// central directory.
const DIGITAL_SIGNATURE: u32 = 0x05054b50;

/// The parsed central directory of an archive.
#[derive(Debug, Clone, Default)]
pub struct CentralDirectory {
    entries: IndexMap<String, ZipEntry>,
    comment: String,
    preamble: u64,
    postamble: u64,
    mapper: OffsetMapper,
    start: u64,
    zip64: bool,
}

/// Where the end of central directory record sits.
struct EocdLocation {
    position: u64,
    record: EocdRecord,
}

impl CentralDirectory {
    /// Locate and parse the central directory of `source`.
    #[tracing::instrument(level = "debug", skip_all, fields(size = source.size()))]
    pub fn locate(source: &dyn ReadAt, config: &ReaderConfig) -> Result<Self> {
        let size = source.size();
        let limit = match config.postamble {
            Postamble::Bounded => (EocdRecord::SIZE + MAX_COMMENT_LENGTH) as u64,
            Postamble::Unbounded => size,
        };
        let EocdLocation {
            position: eocd_pos,
            record: eocd,
        } = find_eocd(source, limit)?;

        let comment_len = eocd.comment_length.get() as usize;
        let comment_end = eocd_pos + EocdRecord::SIZE as u64 + comment_len as u64;
        let comment_bytes = read_vec(source, eocd_pos + EocdRecord::SIZE as u64, comment_len)?;
        let comment = config.charset.decode(&comment_bytes)?;
        let postamble = size - comment_end;

        if eocd.disk_number.get() != 0
            || eocd.central_dir_disk.get() != 0
            || eocd.central_dir_count_disk.get() != eocd.central_dir_count_total.get()
        {
            return Err(Error::MultiVolume);
        }

        let mut declared = u64::from(eocd.central_dir_count_total.get());
        let mut cd_size = u64::from(eocd.central_dir_size.get());
        let mut cd_offset = u64::from(eocd.central_dir_offset.get());

        let (mapper, zip64) = match probe_zip64(source, eocd_pos)? {
            Some((record, mapper)) => {
                declared = record.central_dir_count_total.get();
                cd_size = record.central_dir_size.get();
                cd_offset = record.central_dir_offset.get();
                (mapper, true)
            }
            None => {
                // The central directory ends where the EOCD record begins.
                let real_start = eocd_pos.checked_sub(cd_size).ok_or_else(|| {
                    Error::malformed(
                        "end of central directory",
                        format!("central directory size {cd_size} exceeds its position {eocd_pos}"),
                    )
                })?;
                let shift = real_start.checked_sub(cd_offset).ok_or_else(|| {
                    Error::malformed(
                        "end of central directory",
                        format!("central directory offset {cd_offset} is past {real_start}"),
                    )
                })?;
                (OffsetMapper::with_shift(shift), false)
            }
        };

        let start = mapper.map(cd_offset)?;
        if start.checked_add(cd_size).map_or(true, |end| end > eocd_pos) {
            return Err(Error::malformed(
                "central directory",
                format!("{cd_size} bytes at {start} overlap the end record at {eocd_pos}"),
            ));
        }

        let cd_len = usize::try_from(cd_size)
            .map_err(|_| Error::malformed("central directory", "too large to load"))?;
        let data = read_vec(source, start, cd_len)?;
        let entries = parse_entries(&data, config)?;

        let parsed = entries.len() as u64;
        if parsed % 0x10000 != declared % 0x10000 {
            return Err(Error::EntryCountMismatch { declared, parsed });
        }

        let mut preamble = start;
        for entry in entries.values() {
            let offset = entry.offset().unwrap_or(0);
            preamble = preamble.min(mapper.map(offset).map_err(|e| e.in_entry(entry.name()))?);
        }

        debug!(
            eocd = eocd_pos,
            zip64,
            entries = parsed,
            shift = mapper.shift(),
            preamble,
            postamble,
            "located central directory"
        );

        Ok(Self {
            entries,
            comment,
            preamble,
            postamble,
            mapper,
            start,
            zip64,
        })
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by name.
    pub fn get(&self, name: &str) -> Option<&ZipEntry> {
        self.entries.get(name)
    }

    /// Entries in central directory order.
    pub fn entries(&self) -> impl Iterator<Item = &ZipEntry> + '_ {
        self.entries.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }

    /// Archive comment.
    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Bytes before the first local file header.
    #[inline]
    pub fn preamble_len(&self) -> u64 {
        self.preamble
    }

    /// Bytes after the end of central directory record and its comment.
    #[inline]
    pub fn postamble_len(&self) -> u64 {
        self.postamble
    }

    #[inline]
    pub fn mapper(&self) -> OffsetMapper {
        self.mapper
    }

    /// Real position of the first central file header.
    #[inline]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Whether ZIP64 end records were found.
    #[inline]
    pub fn is_zip64(&self) -> bool {
        self.zip64
    }
}

/// Scan backwards at most `limit` bytes for the EOCD record.
///
/// A candidate whose comment would run past the end of the source is a
/// signature inside data, so the scan moves on.
fn find_eocd(source: &dyn ReadAt, limit: u64) -> Result<EocdLocation> {
    let size = source.size();
    if size < EocdRecord::SIZE as u64 {
        return Err(Error::EocdNotFound);
    }
    let floor = size.saturating_sub(limit);
    let overlap = (EocdRecord::MAGIC.len() - 1) as u64;
    let finder = memmem::FinderRev::new(&EocdRecord::MAGIC);

    let mut buf = Vec::new();
    let mut end = size;
    loop {
        let start = end.saturating_sub(SCAN_CHUNK as u64).max(floor);
        buf.resize((end - start) as usize, 0);
        source.read_exact_at(start, &mut buf)?;

        for rel in finder.rfind_iter(&buf) {
            let position = start + rel as u64;
            if position + EocdRecord::SIZE as u64 > size {
                continue;
            }
            let mut raw = [0u8; EocdRecord::SIZE];
            source.read_exact_at(position, &mut raw)?;
            let mut reader = BinaryReader::new_at(&raw, 4);
            let record: EocdRecord = reader.read_struct()?;
            let end_of_comment =
                position + EocdRecord::SIZE as u64 + u64::from(record.comment_length.get());
            if end_of_comment <= size {
                debug!(position, "found end of central directory record");
                return Ok(EocdLocation { position, record });
            }
        }

        if start == floor {
            return Err(Error::EocdNotFound);
        }
        end = start + overlap;
    }
}

/// Probe for a ZIP64 locator right before the EOCD record.
///
/// Returns `None` when there is none, or when the locator points at no
/// record, so that a classic archive whose last bytes merely resemble a
/// locator still opens. A locator naming another disk is an error.
fn probe_zip64(
    source: &dyn ReadAt,
    eocd_pos: u64,
) -> Result<Option<(Eocd64Record, OffsetMapper)>> {
    let Some(locator_pos) = eocd_pos.checked_sub(Eocd64Locator::SIZE as u64) else {
        return Ok(None);
    };
    let mut raw = [0u8; Eocd64Locator::SIZE];
    source.read_exact_at(locator_pos, &mut raw)?;
    let mut reader = BinaryReader::new(&raw);
    if reader.read_u32()? != Eocd64Locator::SIGNATURE {
        return Ok(None);
    }
    let locator: Eocd64Locator = reader.read_struct()?;
    if locator.zip64_eocd_disk.get() != 0 || locator.total_disks.get() != 1 {
        return Err(Error::MultiVolume);
    }

    let recorded = locator.zip64_eocd_offset.get();
    if let Some(record) = read_zip64_record(source, recorded, locator_pos)? {
        return Ok(Some((record, OffsetMapper::Identity)));
    }

    // A preamble the offsets do not account for shifts the record; without
    // extensible data it ends where the locator begins.
    if let Some(actual) = locator_pos.checked_sub(Eocd64Record::SIZE as u64) {
        if actual > recorded {
            if let Some(record) = read_zip64_record(source, actual, locator_pos)? {
                return Ok(Some((record, OffsetMapper::with_shift(actual - recorded))));
            }
        }
    }

    debug!(locator_pos, recorded, "locator without ZIP64 record, ignoring it");
    Ok(None)
}

fn read_zip64_record(
    source: &dyn ReadAt,
    position: u64,
    locator_pos: u64,
) -> Result<Option<Eocd64Record>> {
    if position.saturating_add(Eocd64Record::SIZE as u64) > locator_pos {
        return Ok(None);
    }
    let mut raw = [0u8; Eocd64Record::SIZE];
    source.read_exact_at(position, &mut raw)?;
    let mut reader = BinaryReader::new(&raw);
    if reader.read_u32()? != Eocd64Record::SIGNATURE {
        return Ok(None);
    }
    let record: Eocd64Record = reader.read_struct()?;
    if record.disk_number.get() != 0
        || record.central_dir_disk.get() != 0
        || record.central_dir_count_disk.get() != record.central_dir_count_total.get()
    {
        return Err(Error::MultiVolume);
    }
    Ok(Some(record))
}

fn parse_entries(data: &[u8], config: &ReaderConfig) -> Result<IndexMap<String, ZipEntry>> {
    let mut entries = IndexMap::new();
    let mut reader = BinaryReader::new(data);

    while !reader.is_empty() {
        let signature = reader.read_u32()?;
        if signature == DIGITAL_SIGNATURE {
            break;
        }
        if signature != CentralDirectoryHeader::SIGNATURE {
            return Err(Error::InvalidSignature {
                record: "central file header",
                expected: CentralDirectoryHeader::SIGNATURE,
                actual: signature,
            });
        }
        let header: CentralDirectoryHeader = reader.read_struct()?;
        let name_bytes = reader.read_bytes(header.file_name_length.get() as usize)?;
        let extra_bytes = reader.read_bytes(header.extra_field_length.get() as usize)?;
        let comment_bytes = reader.read_bytes(header.file_comment_length.get() as usize)?;

        let entry = parse_entry(&header, name_bytes, extra_bytes, comment_bytes, config)
            .map_err(|e| e.in_entry(&String::from_utf8_lossy(name_bytes)))?;
        if let Some(previous) = entries.insert(entry.name().to_owned(), entry) {
            warn!(name = previous.name(), "duplicate entry name, keeping the later one");
        }
    }

    Ok(entries)
}

fn parse_entry(
    header: &CentralDirectoryHeader,
    name: &[u8],
    extra: &[u8],
    comment: &[u8],
    config: &ReaderConfig,
) -> Result<ZipEntry> {
    let general_flags = header.flags.get();
    let charset = if general_flags & flags::UTF8 != 0 {
        Charset::Utf8
    } else {
        config.charset
    };

    let mut entry = config.entry_factory.new_entry(charset.decode(name)?);
    entry.set_platform((header.version_made_by.get() >> 8) as u8);
    entry.set_general_flags(general_flags);
    entry.set_dos_time(header.last_modified.get());
    entry.set_crc(header.crc32.get());
    entry.set_internal_attributes(header.internal_attrs.get());
    entry.set_external_attributes(header.external_attrs.get());
    entry.set_extra(ExtraFields::parse(extra)?);
    entry.resolve_sizes(
        header.uncompressed_size.get(),
        header.compressed_size.get(),
        Some(header.local_header_offset.get()),
    )?;

    let method = header.compression_method.get();
    let method = match entry.aes_info() {
        Some(aes) if method == WINZIP_AES_METHOD => aes.method,
        _ => method,
    };
    entry.set_method(method);

    if !comment.is_empty() {
        entry.set_comment(charset.decode(comment)?);
    }
    Ok(entry)
}

fn read_vec(source: &dyn ReadAt, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    source.read_exact_at(offset, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use kovcheg_common::BinaryWriter;

    use super::*;

    /// A single stored entry "a" holding "hi", built by hand.
    fn tiny_archive(comment: &[u8]) -> Vec<u8> {
        let mut w = BinaryWriter::new();
        w.put_u32(0x04034b50);
        w.put_u16(10);
        w.put_u16(0);
        w.put_u16(0);
        w.put_u32(0x00210000);
        w.put_u32(kovcheg_common::crc::hash_bytes(b"hi"));
        w.put_u32(2);
        w.put_u32(2);
        w.put_u16(1);
        w.put_u16(0);
        w.put_bytes(b"a");
        w.put_bytes(b"hi");
        let cd_start = w.len() as u32;

        w.put_u32(0x02014b50);
        w.put_u16(0x031e);
        w.put_u16(10);
        w.put_u16(0);
        w.put_u16(0);
        w.put_u32(0x00210000);
        w.put_u32(kovcheg_common::crc::hash_bytes(b"hi"));
        w.put_u32(2);
        w.put_u32(2);
        w.put_u16(1);
        w.put_u16(0);
        w.put_u16(0);
        w.put_u16(0);
        w.put_u16(0);
        w.put_u32(0);
        w.put_u32(0);
        w.put_bytes(b"a");
        let cd_size = w.len() as u32 - cd_start;

        w.put_u32(0x06054b50);
        w.put_u16(0);
        w.put_u16(0);
        w.put_u16(1);
        w.put_u16(1);
        w.put_u32(cd_size);
        w.put_u32(cd_start);
        w.put_u16(comment.len() as u16);
        w.put_bytes(comment);
        w.into_inner()
    }

    #[test]
    fn test_locate_tiny_archive() {
        let data = tiny_archive(b"hello");
        let cd = CentralDirectory::locate(&data, &ReaderConfig::default()).unwrap();
        assert_eq!(cd.len(), 1);
        assert_eq!(cd.comment(), "hello");
        assert_eq!(cd.preamble_len(), 0);
        assert_eq!(cd.postamble_len(), 0);
        assert_eq!(cd.mapper(), OffsetMapper::Identity);
        let entry = cd.get("a").unwrap();
        assert_eq!(entry.size(), Some(2));
        assert_eq!(entry.offset(), Some(0));
        assert_eq!(entry.platform(), Some(3));
    }

    #[test]
    fn test_shifted_offsets() {
        let mut data = vec![0xAAu8; 100];
        data.extend(tiny_archive(b""));
        let cd = CentralDirectory::locate(&data, &ReaderConfig::default()).unwrap();
        assert_eq!(cd.mapper(), OffsetMapper::Shifted(100));
        assert_eq!(cd.preamble_len(), 100);
        assert_eq!(cd.get("a").unwrap().offset(), Some(0));
    }

    #[test]
    fn test_lookalike_locator_ignored() {
        // An entry comment that ends right where a locator would sit.
        let mut fake = Vec::new();
        fake.extend_from_slice(&Eocd64Locator::MAGIC);
        fake.extend_from_slice(&0u32.to_le_bytes());
        fake.extend_from_slice(&0u64.to_le_bytes());
        fake.extend_from_slice(&1u32.to_le_bytes());
        let mut entry = ZipEntry::new("a");
        entry.set_comment(String::from_utf8(fake).unwrap());

        let mut writer = crate::ZipWriter::new(Vec::new(), crate::WriterConfig::default());
        writer.write_entry(entry, b"hi").unwrap();
        let data = writer.into_inner().unwrap();
        let locator = data.len() - EocdRecord::SIZE - Eocd64Locator::SIZE;
        assert_eq!(&data[locator..locator + 4], &Eocd64Locator::MAGIC);

        let cd = CentralDirectory::locate(&data, &ReaderConfig::default()).unwrap();
        assert!(!cd.is_zip64());
        assert_eq!(cd.mapper(), OffsetMapper::Identity);
        assert_eq!(cd.len(), 1);
    }

    #[test]
    fn test_postamble_bounds() {
        let mut data = tiny_archive(b"");
        data.extend(vec![0u8; 70_000]);
        assert!(matches!(
            CentralDirectory::locate(&data, &ReaderConfig::default()),
            Err(Error::EocdNotFound)
        ));
        let config = ReaderConfig::default().with_postamble(Postamble::Unbounded);
        let cd = CentralDirectory::locate(&data, &config).unwrap();
        assert_eq!(cd.postamble_len(), 70_000);
    }

    #[test]
    fn test_multi_volume_rejected() {
        let mut data = tiny_archive(b"");
        let eocd = data.len() - EocdRecord::SIZE;
        data[eocd + 4] = 1;
        assert!(matches!(
            CentralDirectory::locate(&data, &ReaderConfig::default()),
            Err(Error::MultiVolume)
        ));
    }

    #[test]
    fn test_count_mismatch() {
        let mut data = tiny_archive(b"");
        let eocd = data.len() - EocdRecord::SIZE;
        data[eocd + 8] = 2;
        data[eocd + 10] = 2;
        assert!(matches!(
            CentralDirectory::locate(&data, &ReaderConfig::default()),
            Err(Error::EntryCountMismatch {
                declared: 2,
                parsed: 1
            })
        ));
    }

    #[test]
    fn test_not_a_zip() {
        let data = vec![0u8; 1000];
        assert!(matches!(
            CentralDirectory::locate(&data, &ReaderConfig::default()),
            Err(Error::EocdNotFound)
        ));
        assert!(matches!(
            CentralDirectory::locate(&vec![0u8; 4], &ReaderConfig::default()),
            Err(Error::EocdNotFound)
        ));
    }
}
