//! ZIP archive codec.
//!
//! Reads and writes ZIP archives, including:
//!
//! - ZIP64 extensions for more than 65535 entries or 4 GiB of data
//! - WinZip AES encryption (AE-1 and AE-2, 128/192/256 bit keys)
//! - stored, DEFLATE and BZIP2 content
//! - archives with leading data (self-extractors) or trailing data
//!
//! [`ZipReader`] gives random access to the entries of an archive held by
//! any [`ReadAt`] source. [`ZipWriter`] produces an archive on any
//! [`std::io::Write`] sink, one entry after another.
//!
//! # Example
//!
//! ```
//! use std::io::Write;
//! use kovcheg_zip::{ReaderConfig, WriterConfig, ZipEntry, ZipReader, ZipWriter};
//!
//! let mut writer = ZipWriter::new(Vec::new(), WriterConfig::default());
//! writer.put_next_entry(ZipEntry::new("notes/today.txt"), true)?;
//! writer.write_all(b"buy milk")?;
//! let archive = writer.into_inner()?;
//!
//! let reader = ZipReader::new(archive, ReaderConfig::default())?;
//! assert_eq!(reader.read("notes/today.txt")?, b"buy milk");
//! # Ok::<(), kovcheg_zip::Error>(())
//! ```

mod central_directory;
mod config;
pub mod crypto;
pub mod dostime;
mod entry;
mod error;
mod extra;
mod inflate;
mod mapper;
mod pipeline;
mod pool;
mod reader;
mod source;
mod sync;
mod writer;
pub mod zip;

pub use central_directory::CentralDirectory;
pub use config::{Postamble, ReaderConfig, WriterConfig};
pub use crypto::{AesParams, FnKeyProvider, KeyProvider, KeyStrength, RetryPolicy, StaticKeyProvider};
pub use entry::{platform, DefaultEntryFactory, EntryFactory, ZipEntry};
pub use error::{Error, ErrorKind, Result};
pub use extra::{ExtraField, ExtraFields, WinZipAesInfo, Zip64Info};
pub use mapper::OffsetMapper;
pub use reader::{EntryReader, ZipReader};
pub use source::{FileSource, ReadAt, SubSource};
pub use sync::SyncZipReader;
pub use writer::ZipWriter;
pub use zip::CompressionMethod;

pub use kovcheg_common::Charset;
