//! Kovcheg - ZIP archive reading and writing.
//!
//! This crate provides a unified interface to the Kovcheg crates.
//!
//! # Crates
//!
//! - [`kovcheg_common`] - Common utilities (binary reading, CRC-32, charsets)
//! - [`kovcheg_zip`] - ZIP codec (ZIP64 + WinZip AES + Deflate/BZIP2)
//!
//! # Example
//!
//! ```no_run
//! use kovcheg::prelude::*;
//!
//! // Open an archive and read one entry
//! let archive = ZipReader::from_path("backup.zip", ReaderConfig::default())?;
//! if let Some(entry) = archive.entry("etc/hosts") {
//!     println!("{} bytes", entry.size().unwrap_or(0));
//!     let data = archive.read(entry.name())?;
//!     assert_eq!(data.len() as u64, entry.size().unwrap_or(0));
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Re-export all sub-crates
pub use kovcheg_common as common;
pub use kovcheg_zip as zip;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use kovcheg_common::{crc, Charset};
    pub use kovcheg_zip::{
        AesParams, CompressionMethod, EntryReader, KeyProvider, KeyStrength, ReaderConfig,
        StaticKeyProvider, SyncZipReader, WriterConfig, ZipEntry, ZipReader, ZipWriter,
    };
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
