//! Reader and writer configuration.

use std::fmt;
use std::sync::Arc;

use kovcheg_common::Charset;

use crate::crypto::{KeyProvider, RetryPolicy};
use crate::entry::{DefaultEntryFactory, EntryFactory};
use crate::pool::DEFAULT_POOL_CAPACITY;
use crate::zip::CompressionMethod;

/// How far back from the end of the source to look for the end of central
/// directory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Postamble {
    /// Scan the last 64 KiB plus the record size, the most a comment can
    /// cover.
    #[default]
    Bounded,
    /// Scan the whole source, allowing arbitrary trailing data.
    Unbounded,
}

/// Options for [`ZipReader`](crate::ZipReader).
#[derive(Clone)]
pub struct ReaderConfig {
    /// Charset for names and comments without the UTF-8 flag.
    pub charset: Charset,
    pub postamble: Postamble,
    /// Whether [`ZipReader::read`](crate::ZipReader::read) checks CRC-32 and
    /// authentication codes.
    pub check_crc: bool,
    pub key_provider: Option<Arc<dyn KeyProvider>>,
    /// Penalty between failed password attempts.
    pub retry: RetryPolicy,
    /// Idle inflaters kept for reuse.
    pub pool_capacity: usize,
    pub entry_factory: Arc<dyn EntryFactory>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            charset: Charset::default(),
            postamble: Postamble::default(),
            check_crc: true,
            key_provider: None,
            retry: RetryPolicy::default(),
            pool_capacity: DEFAULT_POOL_CAPACITY,
            entry_factory: Arc::new(DefaultEntryFactory),
        }
    }
}

impl ReaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    pub fn with_postamble(mut self, postamble: Postamble) -> Self {
        self.postamble = postamble;
        self
    }

    pub fn with_check_crc(mut self, check_crc: bool) -> Self {
        self.check_crc = check_crc;
        self
    }

    pub fn with_key_provider(mut self, provider: impl KeyProvider + 'static) -> Self {
        self.key_provider = Some(Arc::new(provider));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn with_entry_factory(mut self, factory: impl EntryFactory + 'static) -> Self {
        self.entry_factory = Arc::new(factory);
        self
    }
}

impl fmt::Debug for ReaderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderConfig")
            .field("charset", &self.charset)
            .field("postamble", &self.postamble)
            .field("check_crc", &self.check_crc)
            .field("key_provider", &self.key_provider.is_some())
            .field("retry", &self.retry)
            .field("pool_capacity", &self.pool_capacity)
            .finish_non_exhaustive()
    }
}

/// Options for [`ZipWriter`](crate::ZipWriter).
#[derive(Clone)]
pub struct WriterConfig {
    /// Charset for names and comments. UTF-8 also sets the UTF-8 flag.
    pub charset: Charset,
    /// Method for entries that do not set one.
    pub method: CompressionMethod,
    /// Compression level, 0-9.
    pub level: u32,
    /// Emit ZIP64 records for every entry and the directory end.
    ///
    /// Older tools may fail to read such archives.
    pub force_zip64: bool,
    /// Archive comment. `None` keeps the comment of an appended archive.
    pub comment: Option<String>,
    pub key_provider: Option<Arc<dyn KeyProvider>>,
    /// Idle deflaters kept for reuse.
    pub pool_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            charset: Charset::default(),
            method: CompressionMethod::default(),
            level: 6,
            force_zip64: false,
            comment: None,
            key_provider: None,
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

impl WriterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    pub fn with_method(mut self, method: CompressionMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level.min(9);
        self
    }

    pub fn with_force_zip64(mut self, force: bool) -> Self {
        self.force_zip64 = force;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_key_provider(mut self, provider: impl KeyProvider + 'static) -> Self {
        self.key_provider = Some(Arc::new(provider));
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }
}

impl fmt::Debug for WriterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterConfig")
            .field("charset", &self.charset)
            .field("method", &self.method)
            .field("level", &self.level)
            .field("force_zip64", &self.force_zip64)
            .field("comment", &self.comment)
            .field("key_provider", &self.key_provider.is_some())
            .field("pool_capacity", &self.pool_capacity)
            .finish()
    }
}
