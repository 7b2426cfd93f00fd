//! Common utilities for Kovcheg.
//!
//! This crate provides the foundational pieces shared by the ZIP codec:
//!
//! - [`le`] - little-endian integer access at byte offsets
//! - [`uint`] - range checks against unsigned field widths
//! - [`BinaryReader`] / [`BinaryWriter`] - cursor-style record parsing and building
//! - [`crc`] - CRC-32 (IEEE) hashing
//! - [`Charset`] - text encodings for entry names and comments

mod charset;
mod error;
mod reader;
mod writer;

pub mod crc;
pub mod le;
pub mod uint;

pub use charset::Charset;
pub use error::{Error, Result};
pub use reader::BinaryReader;
pub use writer::BinaryWriter;

/// Re-export zerocopy traits for convenience
pub use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};
