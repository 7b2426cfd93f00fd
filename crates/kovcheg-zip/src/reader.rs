//! Random access archive reader.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bzip2::read::BzDecoder;
use flate2::Decompress;
use kovcheg_common::crc::Crc32;
use kovcheg_common::BinaryReader;
use memmap2::Mmap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::central_directory::CentralDirectory;
use crate::config::ReaderConfig;
use crate::crypto::{
    authenticate, AesDecryptReader, Backoff, DerivedKeys, KeyStrength, AUTH_CODE_LENGTH,
    PASSWORD_VERIFIER_LENGTH,
};
use crate::entry::ZipEntry;
use crate::inflate::InflateReader;
use crate::pool::Pool;
use crate::source::{FileSource, RangeReader, ReadAt};
use crate::zip::{flags, CompressionMethod, DataDescriptor, LocalFileHeader};
use crate::{Error, Result};

/// A read-only view of an archive over a random access source.
///
/// Entry streams share the source. The view counts open streams and
/// refuses to [`close`](ZipReader::close) while any is alive.
///
/// # Example
///
/// ```no_run
/// use kovcheg_zip::{ReaderConfig, ZipReader};
///
/// let archive = ZipReader::from_path("data.zip", ReaderConfig::default())?;
/// for entry in archive.entries() {
///     println!("{}: {:?} bytes", entry.name(), entry.size());
/// }
/// let data = archive.read("docs/readme.txt")?;
/// # Ok::<(), kovcheg_zip::Error>(())
/// ```
pub struct ZipReader<S> {
    source: Arc<S>,
    directory: CentralDirectory,
    config: ReaderConfig,
    open: Arc<AtomicUsize>,
    backoff: Mutex<Backoff>,
    inflaters: Arc<Pool<Decompress>>,
}

impl<S> std::fmt::Debug for ZipReader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipReader")
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

impl ZipReader<FileSource> {
    /// Open an archive file with positional reads.
    pub fn from_path<P: AsRef<Path>>(path: P, config: ReaderConfig) -> Result<Self> {
        Self::new(FileSource::open(path)?, config)
    }
}

impl ZipReader<Mmap> {
    /// Open an archive file through a memory map.
    pub fn map_path<P: AsRef<Path>>(path: P, config: ReaderConfig) -> Result<Self> {
        let file = File::open(path)?;
        // The map is read-only; the file must not be truncated while open.
        let mmap = unsafe { Mmap::map(&file)? };
        Self::new(mmap, config)
    }
}

impl<S: ReadAt + 'static> ZipReader<S> {
    /// Locate the central directory of `source` and build a view over it.
    pub fn new(source: S, config: ReaderConfig) -> Result<Self> {
        let directory = CentralDirectory::locate(&source, &config)?;
        Ok(Self {
            source: Arc::new(source),
            directory,
            backoff: Mutex::new(Backoff::new(config.retry)),
            inflaters: Pool::new(config.pool_capacity),
            config,
            open: Arc::new(AtomicUsize::new(0)),
        })
    }

    #[inline]
    pub fn directory(&self) -> &CentralDirectory {
        &self.directory
    }

    /// Entries in central directory order.
    pub fn entries(&self) -> impl Iterator<Item = &ZipEntry> + '_ {
        self.directory.entries()
    }

    pub fn entry(&self, name: &str) -> Option<&ZipEntry> {
        self.directory.get(name)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.directory.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.directory.is_empty()
    }

    pub fn comment(&self) -> &str {
        self.directory.comment()
    }

    #[inline]
    pub fn preamble_len(&self) -> u64 {
        self.directory.preamble_len()
    }

    #[inline]
    pub fn postamble_len(&self) -> u64 {
        self.directory.postamble_len()
    }

    /// Stream over the bytes before the first local file header.
    pub fn preamble(&self) -> impl Read {
        RangeReader::new(self.shared_source(), 0, self.directory.preamble_len())
    }

    /// Number of entry streams currently open.
    #[inline]
    pub fn open_count(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }

    #[inline]
    pub fn busy(&self) -> bool {
        self.open_count() > 0
    }

    /// Read a whole entry, checking CRC-32 and authentication as configured.
    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        let mut stream = self.open(name, self.config.check_crc, true)?;
        let mut data = Vec::with_capacity(
            self.entry(name)
                .and_then(ZipEntry::size)
                .map_or(0, |size| size.min(1 << 26) as usize),
        );
        stream.read_to_end(&mut data)?;
        stream.finish()?;
        Ok(data)
    }

    /// Open a stream over an entry's content.
    ///
    /// With `decode` unset the stream yields the stored bytes as they are,
    /// still compressed and encrypted, for copying into another archive.
    /// With `check_crc` set, the CRC-32 and size are verified when the
    /// stream ends, and WinZip AES content is authenticated before the
    /// stream is returned.
    pub fn open(&self, name: &str, check_crc: bool, decode: bool) -> Result<EntryReader> {
        let entry = self
            .directory
            .get(name)
            .ok_or_else(|| Error::EntryNotFound(name.to_owned()))?;
        self.open_entry(entry, check_crc, decode)
            .map_err(|e| e.in_entry(name))
    }

    /// Give the source back once no entry streams are open.
    pub fn close(self) -> Result<S> {
        let open = self.open_count();
        if open > 0 {
            return Err(Error::Busy { open });
        }
        let Self { source, .. } = self;
        Arc::try_unwrap(source).map_err(|_| Error::Busy { open: 1 })
    }

    fn shared_source(&self) -> Arc<dyn ReadAt> {
        self.source.clone()
    }

    fn open_entry(&self, entry: &ZipEntry, check_crc: bool, decode: bool) -> Result<EntryReader> {
        let name = entry.name();
        let recorded = entry
            .offset()
            .ok_or_else(|| Error::malformed("central file header", "offset unknown"))?;
        let compressed_size = entry
            .compressed_size()
            .ok_or_else(|| Error::malformed("central file header", "compressed size unknown"))?;
        let header_pos = self.directory.mapper().map(recorded)?;

        let mut raw = [0u8; LocalFileHeader::SIZE];
        self.source.read_exact_at(header_pos, &mut raw)?;
        let mut reader = BinaryReader::new(&raw);
        let signature = reader.read_u32()?;
        if signature != LocalFileHeader::SIGNATURE {
            return Err(Error::InvalidSignature {
                record: "local file header",
                expected: LocalFileHeader::SIGNATURE,
                actual: signature,
            });
        }
        let header: LocalFileHeader = reader.read_struct()?;
        let data_start =
            header_pos + LocalFileHeader::SIZE as u64 + header.variable_data_size() as u64;
        if data_start
            .checked_add(compressed_size)
            .map_or(true, |end| end > self.source.size())
        {
            return Err(Error::malformed(
                "local file header",
                format!("{compressed_size} bytes at {data_start} run past the end of the archive"),
            ));
        }

        let guard = OpenGuard::new(&self.open);
        let source = self.shared_source();

        if !decode {
            let range = RangeReader::new(source, data_start, compressed_size);
            return Ok(EntryReader::new(Box::new(range), guard, name, None));
        }

        let mut expected_crc = Some(header.crc32.get());
        let mut authenticator = None;
        let method = if entry.is_encrypted() {
            let aes = entry.aes_info().copied().ok_or_else(|| Error::UnsupportedEncryption {
                name: name.to_owned(),
            })?;
            if !aes.vendor_version.keeps_crc() {
                expected_crc = None;
            }
            aes.method
        } else {
            entry.method().unwrap_or(0)
        };
        let method = CompressionMethod::try_from(method).map_err(|method| {
            Error::UnsupportedCompression {
                name: name.to_owned(),
                method,
            }
        })?;

        let content: Box<dyn Read + Send> = match entry.aes_info() {
            Some(aes) if entry.is_encrypted() => {
                let strength = aes.key_strength;
                let header_len = (strength.salt_len() + PASSWORD_VERIFIER_LENGTH) as u64;
                let cipher_len = compressed_size
                    .checked_sub(strength.overhead())
                    .ok_or_else(|| {
                        Error::malformed(
                            "WinZip AES content",
                            format!("{compressed_size} bytes is shorter than the wrapper"),
                        )
                    })?;
                let keys = self.unlock(name, strength, data_start)?;

                let mut tag = [0u8; AUTH_CODE_LENGTH];
                self.source
                    .read_exact_at(data_start + header_len + cipher_len, &mut tag)?;
                let auth = Authenticator {
                    source: source.clone(),
                    offset: data_start + header_len,
                    len: cipher_len,
                    keys,
                    tag,
                    name: name.to_owned(),
                };
                if check_crc {
                    auth.verify()?;
                }
                let range = RangeReader::new(source, data_start + header_len, cipher_len);
                let decrypted = AesDecryptReader::new(range, &auth.keys)?;
                authenticator = Some(auth);
                Box::new(decrypted)
            }
            _ => Box::new(RangeReader::new(source, data_start, compressed_size)),
        };

        let decoded: Box<dyn Read + Send> = match method {
            CompressionMethod::Stored => content,
            CompressionMethod::Deflated => {
                // One trailing zero byte keeps the inflater fed at the very
                // end of the stream.
                let padded = content.chain(io::repeat(0).take(1));
                let engine = self.inflaters.take(|| Decompress::new(false));
                Box::new(InflateReader::new(BufReader::new(padded), engine))
            }
            CompressionMethod::Bzip2 => Box::new(BzDecoder::new(content)),
        };

        let check = if check_crc {
            if expected_crc.is_some() && header.flags.get() & flags::DATA_DESCRIPTOR != 0 {
                expected_crc = Some(self.descriptor_crc(data_start + compressed_size)?);
            }
            Some(Check {
                crc: Crc32::new(),
                expected_crc,
                expected_size: entry.size(),
            })
        } else {
            None
        };

        let mut stream = EntryReader::new(decoded, guard, name, check);
        stream.authenticator = authenticator;
        Ok(stream)
    }

    /// CRC-32 from the data descriptor at `position`.
    fn descriptor_crc(&self, position: u64) -> Result<u32> {
        let available = self.source.size().saturating_sub(position).min(8) as usize;
        let mut raw = [0u8; 8];
        self.source.read_exact_at(position, &mut raw[..available])?;
        DataDescriptor::read_crc(&raw[..available])
    }

    /// Ask the key provider for passwords until one passes the verifier.
    ///
    /// Each failure sleeps for the retry penalty before the next prompt.
    fn unlock(&self, name: &str, strength: KeyStrength, data_start: u64) -> Result<DerivedKeys> {
        let provider = self
            .config
            .key_provider
            .as_ref()
            .ok_or_else(|| Error::MissingKeyProvider {
                name: name.to_owned(),
            })?;

        let salt_len = strength.salt_len();
        let mut header = vec![0u8; salt_len + PASSWORD_VERIFIER_LENGTH];
        self.source.read_exact_at(data_start, &mut header)?;
        let (salt, verifier) = header.split_at(salt_len);

        let mut invalid = false;
        loop {
            let Some(password) = provider.read_key(name, invalid) else {
                return Err(if invalid {
                    Error::WrongPassword {
                        name: name.to_owned(),
                    }
                } else {
                    Error::KeyCancelled {
                        name: name.to_owned(),
                    }
                });
            };
            let keys = DerivedKeys::derive(&password, salt, strength);
            if keys.verifies(verifier) {
                self.backoff.lock().reset();
                debug!(entry = name, bits = strength.bits(), "password accepted");
                return Ok(keys);
            }

            let delay = self.backoff.lock().fail();
            warn!(entry = name, ?delay, "wrong password");
            std::thread::sleep(delay);
            invalid = true;
        }
    }
}

/// Decrements the open stream count when dropped.
struct OpenGuard {
    count: Arc<AtomicUsize>,
}

impl OpenGuard {
    fn new(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self {
            count: Arc::clone(count),
        }
    }
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
    }
}

struct Check {
    crc: Crc32,
    expected_crc: Option<u32>,
    expected_size: Option<u64>,
}

/// Recomputes a WinZip AES authentication code on demand.
struct Authenticator {
    source: Arc<dyn ReadAt>,
    offset: u64,
    len: u64,
    keys: DerivedKeys,
    tag: [u8; AUTH_CODE_LENGTH],
    name: String,
}

impl Authenticator {
    fn verify(&self) -> Result<()> {
        authenticate(
            &*self.source,
            self.offset,
            self.len,
            &self.keys,
            &self.tag,
            &self.name,
        )
    }
}

/// Stream over one entry's content.
///
/// Counts as open on its archive until dropped. With checking enabled, the
/// CRC-32 and size are verified when the content ends; a mismatch surfaces
/// as an `InvalidData` read error carrying the codec [`Error`].
pub struct EntryReader {
    inner: Box<dyn Read + Send>,
    name: String,
    check: Option<Check>,
    verified: bool,
    authenticator: Option<Authenticator>,
    _guard: OpenGuard,
}

impl EntryReader {
    fn new(
        inner: Box<dyn Read + Send>,
        guard: OpenGuard,
        name: &str,
        check: Option<Check>,
    ) -> Self {
        Self {
            inner,
            name: name.to_owned(),
            check,
            verified: false,
            authenticator: None,
            _guard: guard,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this entry is WinZip AES encrypted and can be authenticated.
    pub fn is_authenticated_content(&self) -> bool {
        self.authenticator.is_some()
    }

    /// Verify the WinZip AES authentication code over the ciphertext.
    ///
    /// Independent of the CRC-32 check; does nothing for unencrypted
    /// entries.
    pub fn authenticate(&self) -> Result<()> {
        match &self.authenticator {
            Some(auth) => auth.verify(),
            None => Ok(()),
        }
    }

    /// Consume the rest of the content and run the checks.
    pub fn finish(mut self) -> Result<()> {
        io::copy(&mut self, &mut io::sink())?;
        self.verify()
    }

    fn verify(&mut self) -> Result<()> {
        if self.verified {
            return Ok(());
        }
        self.verified = true;
        let Some(check) = &self.check else {
            return Ok(());
        };
        let actual = check.crc.count();
        if let Some(expected) = check.expected_size {
            if expected != actual {
                return Err(Error::SizeMismatch {
                    name: self.name.clone(),
                    expected,
                    actual,
                });
            }
        }
        if let Some(expected) = check.expected_crc {
            let actual = check.crc.value();
            if expected != actual {
                return Err(Error::CrcMismatch {
                    name: self.name.clone(),
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}

impl Read for EntryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if let Some(check) = &mut self.check {
            check.crc.update(&buf[..n]);
        }
        if n == 0 && !buf.is_empty() {
            self.verify()?;
        }
        Ok(n)
    }
}

impl std::fmt::Debug for EntryReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryReader")
            .field("name", &self.name)
            .field("checked", &self.check.is_some())
            .field("encrypted", &self.authenticator.is_some())
            .finish_non_exhaustive()
    }
}
