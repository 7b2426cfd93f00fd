//! Error types for kovcheg-common.

use thiserror::Error;

/// Common error type for Kovcheg operations.
#[derive(Debug, Error)]
pub enum Error {
    /// End of buffer reached while reading.
    #[error("unexpected end of buffer: needed {needed} bytes but only {available} available")]
    UnexpectedEof { needed: usize, available: usize },

    /// Invalid magic bytes encountered.
    #[error("invalid magic: expected {expected:?}, got {actual:?}")]
    InvalidMagic {
        expected: Vec<u8>,
        actual: Vec<u8>,
    },

    /// A value does not fit the unsigned width of the named field.
    #[error("{field} out of range: {value} exceeds {max}")]
    OutOfRange {
        field: &'static str,
        value: i128,
        max: u64,
    },

    /// A negative value was given for an unsigned field.
    #[error("{field} out of range: {value} is negative")]
    Negative { field: &'static str, value: i128 },

    /// Text could not be represented in the selected charset.
    #[error("character {ch:?} cannot be encoded as {charset}")]
    Unencodable { ch: char, charset: &'static str },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 decoding error.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
