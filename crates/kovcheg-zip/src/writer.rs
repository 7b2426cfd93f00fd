//! Streaming archive writer.

use std::io::{self, Write};
use std::sync::Arc;

use flate2::Compress;
use indexmap::IndexMap;
use kovcheg_common::uint::{self, UINT16_MAX, UINT32_MAX};
use kovcheg_common::BinaryWriter;
use tracing::{debug, warn};
use zerocopy::byteorder::little_endian::{U16, U32, U64};

use crate::central_directory::CentralDirectory;
use crate::config::WriterConfig;
use crate::dostime;
use crate::entry::{platform, ZipEntry, Zip64Layout};
use crate::extra;
use crate::mapper::OffsetMapper;
use crate::pipeline::{Pipeline, PipelinePlan};
use crate::pool::Pool;
use crate::reader::ZipReader;
use crate::source::ReadAt;
use crate::zip::{
    CentralDirectoryHeader, CompressionMethod, DataDescriptor, Eocd64Locator, Eocd64Record,
    EocdRecord, LocalFileHeader, VERSION_MADE_BY, WINZIP_AES_VERSION, ZIP64_VERSION,
};
use crate::{Error, Result};

/// Largest ZIP64 extra field: three values plus the prefix.
const MAX_ZIP64_EXTRA: usize = extra::HEADER_SIZE + 3 * 8;

/// Counts bytes passed to the inner writer.
#[derive(Debug)]
struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W> CountingWriter<W> {
    fn new(inner: W, count: u64) -> Self {
        Self { inner, count }
    }

    fn count(&self) -> u64 {
        self.count
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.count += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// The entry currently being written.
struct OpenEntry {
    entry: ZipEntry,
    pipeline: Pipeline,
    data_start: u64,
    zip64_header: bool,
}

enum State {
    Idle,
    Writing(Box<OpenEntry>),
    Finished,
}

/// A forward-only archive writer.
///
/// Entries are started with [`put_next_entry`](ZipWriter::put_next_entry),
/// their content is written through [`Write`], and the central directory
/// goes out in [`finish`](ZipWriter::finish). Dropping the writer without
/// finishing leaves an archive without a central directory.
///
/// # Example
///
/// ```
/// use std::io::Write;
/// use kovcheg_zip::{WriterConfig, ZipEntry, ZipWriter};
///
/// let mut writer = ZipWriter::new(Vec::new(), WriterConfig::default());
/// writer.put_next_entry(ZipEntry::new("hello.txt"), true)?;
/// writer.write_all(b"Hello, world!")?;
/// let archive = writer.into_inner()?;
/// assert_eq!(&archive[..4], b"PK\x03\x04");
/// # Ok::<(), kovcheg_zip::Error>(())
/// ```
pub struct ZipWriter<W: Write> {
    sink: CountingWriter<W>,
    config: WriterConfig,
    entries: IndexMap<String, ZipEntry>,
    state: State,
    mapper: OffsetMapper,
    comment: String,
    deflaters: Arc<Pool<Compress>>,
}

impl<W: Write> ZipWriter<W> {
    /// Start a new archive at the beginning of `sink`.
    pub fn new(sink: W, config: WriterConfig) -> Self {
        let comment = config.comment.clone().unwrap_or_default();
        Self {
            sink: CountingWriter::new(sink, 0),
            deflaters: Pool::new(config.pool_capacity),
            config,
            entries: IndexMap::new(),
            state: State::Idle,
            mapper: OffsetMapper::Identity,
            comment,
        }
    }

    /// Resume an existing archive.
    ///
    /// `sink` must be positioned at the start of the archive's central
    /// directory, with everything from there on discarded. The existing
    /// entries are carried into the new central directory and new offsets
    /// are recorded the way the archive records them.
    pub fn append(sink: W, directory: &CentralDirectory, config: WriterConfig) -> Self {
        let comment = config
            .comment
            .clone()
            .unwrap_or_else(|| directory.comment().to_owned());
        let entries = directory
            .entries()
            .map(|entry| (entry.name().to_owned(), entry.clone()))
            .collect();
        debug!(
            start = directory.start(),
            entries = directory.len(),
            "appending to archive"
        );
        Self {
            sink: CountingWriter::new(sink, directory.start()),
            deflaters: Pool::new(config.pool_capacity),
            config,
            entries,
            state: State::Idle,
            mapper: directory.mapper(),
            comment,
        }
    }

    /// Entries written so far, including carried-over ones.
    pub fn entries(&self) -> impl Iterator<Item = &ZipEntry> + '_ {
        self.entries.values()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Finished)
    }

    /// Bytes written to the sink, counted from its start.
    #[inline]
    pub fn position(&self) -> u64 {
        self.sink.count()
    }

    /// Begin a new entry, closing the current one first.
    ///
    /// With `process` set the content is checksummed, compressed with the
    /// entry's method (or the configured default) and encrypted if the entry
    /// is flagged encrypted. Without it, the content must already be in its
    /// stored form, and the entry's CRC-32 and sizes are taken as given.
    pub fn put_next_entry(&mut self, entry: ZipEntry, process: bool) -> Result<()> {
        self.close_entry()?;
        if self.is_finished() {
            return Err(Error::WriterFinished);
        }
        let name = entry.name().to_owned();
        if self.entries.contains_key(&name) {
            return Err(Error::DuplicateEntry(name));
        }
        self.start_entry(entry, process)
            .map_err(|e| e.in_entry(&name))
    }

    /// Write a whole entry.
    ///
    /// The uncompressed size is taken from `data` unless already declared.
    pub fn write_entry(&mut self, mut entry: ZipEntry, data: &[u8]) -> Result<()> {
        if entry.size().is_none() {
            entry.set_size(data.len() as u64);
        }
        self.put_next_entry(entry, true)?;
        self.write_content(data)?;
        self.close_entry()
    }

    /// Copy an entry from another archive without recompressing it.
    pub fn copy_from<S: ReadAt + 'static>(&mut self, reader: &ZipReader<S>, name: &str) -> Result<()> {
        let entry = reader
            .entry(name)
            .ok_or_else(|| Error::EntryNotFound(name.to_owned()))?
            .clone();
        let mut stream = reader.open(name, false, false)?;
        self.put_next_entry(entry, false)?;
        io::copy(&mut stream, self)?;
        self.close_entry()
    }

    /// Finish the current entry, if any.
    pub fn close_entry(&mut self) -> Result<()> {
        let open = match std::mem::replace(&mut self.state, State::Idle) {
            State::Writing(open) => open,
            other => {
                self.state = other;
                return Ok(());
            }
        };
        let OpenEntry {
            mut entry,
            mut pipeline,
            data_start,
            zip64_header,
        } = *open;
        let name = entry.name().to_owned();
        self.finish_entry(&mut entry, &mut pipeline, data_start, zip64_header)
            .map_err(|e| e.in_entry(&name))?;
        debug!(
            name = %name,
            size = entry.size(),
            compressed = entry.compressed_size(),
            "entry written"
        );
        self.entries.insert(name, entry);
        Ok(())
    }

    /// Close the current entry and write the central directory.
    ///
    /// Entries whose compressed or uncompressed size is still unknown are
    /// left out of the central directory; their bytes stay in the archive.
    #[tracing::instrument(level = "debug", skip_all, fields(entries = self.entries.len()))]
    pub fn finish(&mut self) -> Result<()> {
        if self.is_finished() {
            return Ok(());
        }
        self.close_entry()?;
        let force = self.config.force_zip64;

        let cd_start = self.sink.count();
        let mut count = 0u64;
        for entry in self.entries.values() {
            if entry.compressed_size().is_none() || entry.size().is_none() {
                warn!(name = entry.name(), "leaving entry of unknown size out of the central directory");
                continue;
            }
            let header = self
                .central_header(entry)
                .map_err(|e| e.in_entry(entry.name()))?;
            self.sink.write_all(&header)?;
            count += 1;
        }
        let cd_size = self.sink.count() - cd_start;
        let cd_offset = self.mapper.unmap(cd_start)?;

        let zip64 = force || count >= UINT16_MAX || cd_size >= UINT32_MAX || cd_offset >= UINT32_MAX;
        let mut end = BinaryWriter::with_capacity(
            Eocd64Record::SIZE + Eocd64Locator::SIZE + EocdRecord::SIZE + self.comment.len(),
        );
        if zip64 {
            let record_offset = self.mapper.unmap(self.sink.count())?;
            end.put_u32(Eocd64Record::SIGNATURE);
            end.put_struct(&Eocd64Record {
                record_size: U64::new(Eocd64Record::RECORD_SIZE),
                version_made_by: U16::new(VERSION_MADE_BY),
                version_needed: U16::new(ZIP64_VERSION),
                disk_number: U32::new(0),
                central_dir_disk: U32::new(0),
                central_dir_count_disk: U64::new(count),
                central_dir_count_total: U64::new(count),
                central_dir_size: U64::new(cd_size),
                central_dir_offset: U64::new(cd_offset),
            });
            end.put_u32(Eocd64Locator::SIGNATURE);
            end.put_struct(&Eocd64Locator {
                zip64_eocd_disk: U32::new(0),
                zip64_eocd_offset: U64::new(record_offset),
                total_disks: U32::new(1),
            });
        }

        let comment = self.config.charset.encode(&self.comment)?;
        let comment_len = uint::check_u16(comment.len() as u64, "archive comment length")?;
        let entries16 = if zip64 && (force || count >= UINT16_MAX) {
            u16::MAX
        } else {
            count as u16
        };
        end.put_u32(EocdRecord::SIGNATURE);
        end.put_struct(&EocdRecord {
            disk_number: U16::new(0),
            central_dir_disk: U16::new(0),
            central_dir_count_disk: U16::new(entries16),
            central_dir_count_total: U16::new(entries16),
            central_dir_size: U32::new(fit_u32(cd_size, force)),
            central_dir_offset: U32::new(fit_u32(cd_offset, force)),
            comment_length: U16::new(comment_len),
        });
        end.put_bytes(&comment);
        self.sink.write_all(end.as_slice())?;
        self.sink.flush()?;

        debug!(entries = count, zip64, cd_offset, cd_size, "archive finished");
        self.state = State::Finished;
        Ok(())
    }

    /// Finish the archive if needed and return the sink.
    pub fn into_inner(mut self) -> Result<W> {
        self.finish()?;
        Ok(self.sink.inner)
    }

    fn write_content(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.state {
            State::Writing(open) => open.pipeline.write(data, &mut self.sink),
            State::Idle => Err(Error::NoOpenEntry),
            State::Finished => Err(Error::WriterFinished),
        }
    }

    fn start_entry(&mut self, mut entry: ZipEntry, process: bool) -> Result<()> {
        let name = entry.name().to_owned();
        let encryption = if process && entry.is_encrypted() {
            let provider = self
                .config
                .key_provider
                .as_ref()
                .ok_or_else(|| Error::MissingKeyProvider { name: name.clone() })?;
            Some(
                provider
                    .write_key(&name)
                    .ok_or_else(|| Error::MissingParameters { name: name.clone() })?,
            )
        } else {
            None
        };
        let method = match entry.method() {
            None => self.config.method,
            Some(code) => CompressionMethod::try_from(code).or_else(|method| {
                if process {
                    Err(Error::UnsupportedCompression {
                        name: name.clone(),
                        method,
                    })
                } else {
                    // Raw copies keep whatever method they were stored with.
                    Ok(self.config.method)
                }
            })?,
        };

        let mut pipeline = Pipeline::build(
            PipelinePlan {
                process,
                method,
                level: self.config.level,
                encryption,
            },
            &self.deflaters,
        )?;
        pipeline.init(&mut entry)?;
        self.init_entry(&mut entry)?;
        self.check_lengths(&entry)?;

        let zip64_header = self.write_local_header(&entry)?;
        self.state = State::Writing(Box::new(OpenEntry {
            entry,
            pipeline,
            data_start: self.sink.count(),
            zip64_header,
        }));
        Ok(())
    }

    /// Defaults and flags applied after the pipeline stages.
    fn init_entry(&self, entry: &mut ZipEntry) -> Result<()> {
        if entry.platform().is_none() {
            entry.set_platform(platform::current());
        }
        if entry.dos_time().is_none() {
            entry.set_time(dostime::now_millis());
        }
        entry.set_utf8(self.config.charset == kovcheg_common::Charset::Utf8);
        let unknown =
            entry.crc().is_none() || entry.compressed_size().is_none() || entry.size().is_none();
        entry.set_data_descriptor(unknown);
        entry.set_offset(self.mapper.unmap(self.sink.count())?);
        Ok(())
    }

    /// Name, comment and extra field must each fit a 16-bit length.
    fn check_lengths(&self, entry: &ZipEntry) -> Result<()> {
        let charset = self.config.charset;
        uint::check_u16(charset.encoded_len(entry.name())? as u64, "file name length")?;
        if let Some(comment) = entry.comment() {
            uint::check_u16(charset.encoded_len(comment)? as u64, "file comment length")?;
        }
        let mut extra = entry.extra().clone();
        extra.remove(crate::zip::central_dir::extra_field::ZIP64);
        uint::check_u16(
            (extra.encoded_len() + MAX_ZIP64_EXTRA) as u64,
            "extra field length",
        )?;
        Ok(())
    }

    fn write_local_header(&mut self, entry: &ZipEntry) -> Result<bool> {
        let name = self.config.charset.encode(entry.name())?;
        let layout = entry.zip64_values(self.config.force_zip64, false);
        let extra = entry.encoded_extra(&layout);
        let deferred = entry.has_data_descriptor();
        let value = |known: Option<u64>, overflowed: bool| -> u32 {
            match known {
                _ if overflowed => u32::MAX,
                _ if deferred => 0,
                Some(v) => v as u32,
                None => 0,
            }
        };

        let header = LocalFileHeader {
            version_needed: U16::new(version_needed(entry, !layout.is_empty())),
            flags: U16::new(entry.general_flags()),
            compression_method: U16::new(entry.header_method()),
            last_modified: U32::new(entry.dos_time().unwrap_or(dostime::MIN_DOS_TIME)),
            crc32: U32::new(if deferred { 0 } else { entry.crc().unwrap_or(0) }),
            compressed_size: U32::new(value(entry.compressed_size(), layout.compressed_size)),
            uncompressed_size: U32::new(value(entry.size(), layout.size)),
            file_name_length: U16::new(name.len() as u16),
            extra_field_length: U16::new(extra.len() as u16),
        };

        let mut out = BinaryWriter::with_capacity(LocalFileHeader::SIZE + name.len() + extra.len());
        out.put_u32(LocalFileHeader::SIGNATURE);
        out.put_struct(&header);
        out.put_bytes(&name);
        out.put_bytes(&extra);
        self.sink.write_all(out.as_slice())?;
        Ok(!layout.is_empty())
    }

    fn finish_entry(
        &mut self,
        entry: &mut ZipEntry,
        pipeline: &mut Pipeline,
        data_start: u64,
        zip64_header: bool,
    ) -> Result<()> {
        pipeline.finish(entry, &mut self.sink)?;

        let written = self.sink.count() - data_start;
        if let Some(expected) = entry.compressed_size() {
            if expected != written {
                return Err(Error::SizeMismatch {
                    name: entry.name().to_owned(),
                    expected,
                    actual: written,
                });
            }
        }
        entry.set_compressed_size(written);

        // 8-byte descriptor sizes only go with a ZIP64 extra in the local
        // header; otherwise they saturate and the central directory holds
        // the real values.
        if entry.has_data_descriptor() {
            let size = entry.size().unwrap_or(0);
            if !zip64_header && (written >= UINT32_MAX || size >= UINT32_MAX) {
                warn!(
                    name = entry.name(),
                    "entry outgrew its local header, data descriptor sizes saturated"
                );
            }
            let fit = |value: u64| if zip64_header { value } else { value.min(UINT32_MAX) };
            let descriptor = DataDescriptor {
                crc32: entry.crc().unwrap_or(0),
                compressed_size: fit(written),
                uncompressed_size: fit(size),
            };
            self.sink.write_all(&descriptor.encode(zip64_header))?;
        }
        Ok(())
    }

    fn central_header(&self, entry: &ZipEntry) -> Result<Vec<u8>> {
        let charset = self.config.charset;
        let name = charset.encode(entry.name())?;
        let comment = charset.encode(entry.comment().unwrap_or_default())?;
        let layout: Zip64Layout = entry.zip64_values(self.config.force_zip64, true);
        let extra = entry.encoded_extra(&layout);
        let fit = |value: Option<u64>, overflowed: bool| -> u32 {
            if overflowed {
                u32::MAX
            } else {
                value.unwrap_or(0) as u32
            }
        };

        let header = CentralDirectoryHeader {
            version_made_by: U16::new(
                u16::from(entry.platform().unwrap_or(platform::FAT)) << 8 | VERSION_MADE_BY,
            ),
            version_needed: U16::new(version_needed(entry, !layout.is_empty())),
            flags: U16::new(entry.general_flags()),
            compression_method: U16::new(entry.header_method()),
            last_modified: U32::new(entry.dos_time().unwrap_or(dostime::MIN_DOS_TIME)),
            crc32: U32::new(entry.crc().unwrap_or(0)),
            compressed_size: U32::new(fit(entry.compressed_size(), layout.compressed_size)),
            uncompressed_size: U32::new(fit(entry.size(), layout.size)),
            file_name_length: U16::new(uint::check_u16(name.len() as u64, "file name length")?),
            extra_field_length: U16::new(uint::check_u16(extra.len() as u64, "extra field length")?),
            file_comment_length: U16::new(uint::check_u16(
                comment.len() as u64,
                "file comment length",
            )?),
            disk_number_start: U16::new(0),
            internal_attrs: U16::new(entry.internal_attributes()),
            external_attrs: U32::new(entry.external_attributes()),
            local_header_offset: U32::new(fit(entry.offset(), layout.offset)),
        };

        let mut out = BinaryWriter::with_capacity(
            CentralDirectoryHeader::SIZE + name.len() + extra.len() + comment.len(),
        );
        out.put_u32(CentralDirectoryHeader::SIGNATURE);
        out.put_struct(&header);
        out.put_bytes(&name);
        out.put_bytes(&extra);
        out.put_bytes(&comment);
        Ok(out.into_inner())
    }
}

impl<W: Write> Write for ZipWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_content(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

fn version_needed(entry: &ZipEntry, zip64: bool) -> u16 {
    let mut version = entry
        .compression()
        .map_or(20, CompressionMethod::version_needed);
    if zip64 {
        version = version.max(ZIP64_VERSION);
    }
    if entry.is_encrypted() && entry.aes_info().is_some() {
        version = version.max(WINZIP_AES_VERSION);
    }
    version
}

/// A 32-bit end record field, or its sentinel.
fn fit_u32(value: u64, force: bool) -> u32 {
    if force || value >= UINT32_MAX {
        u32::MAX
    } else {
        value as u32
    }
}
