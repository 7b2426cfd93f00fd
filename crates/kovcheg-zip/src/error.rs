//! Error types for the ZIP codec.

use std::io;

use thiserror::Error;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The underlying source or sink failed.
    Io,
    /// Malformed or unsupported archive structure.
    Format,
    /// Content checksum or size disagrees with the recorded value.
    Integrity,
    /// WinZip AES authentication code mismatch.
    Authentication,
    /// Password could not be obtained or verified.
    Key,
    /// No usable crypto parameters were supplied.
    Parameter,
    /// Unsupported compression method or encryption scheme.
    Capability,
    /// The operation is not valid in the current state.
    State,
}

/// Errors that can occur when reading or writing ZIP archives.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// Common library error.
    #[error("{0}")]
    Common(#[from] kovcheg_common::Error),

    /// Error attributed to a specific entry.
    #[error("{name}: {source}")]
    Entry {
        name: String,
        #[source]
        source: Box<Error>,
    },

    /// Invalid record signature.
    #[error("invalid {record} signature: expected {expected:#010x}, got {actual:#010x}")]
    InvalidSignature {
        record: &'static str,
        expected: u32,
        actual: u32,
    },

    /// Could not find the end of central directory record.
    #[error("could not find end of central directory record")]
    EocdNotFound,

    /// The archive spans several volumes.
    #[error("multi-volume archives are not supported")]
    MultiVolume,

    /// A record is internally inconsistent.
    #[error("malformed {context}: {reason}")]
    Malformed {
        context: &'static str,
        reason: String,
    },

    /// The central directory does not hold the declared number of entries.
    #[error("central directory declares {declared} entries but holds {parsed}")]
    EntryCountMismatch { declared: u64, parsed: u64 },

    /// Extra field sizes do not partition the extra data block.
    #[error("extra field {id:#06x} declares {declared} bytes but only {available} remain")]
    ExtraFieldOverrun {
        id: u16,
        declared: usize,
        available: usize,
    },

    /// CRC-32 of the content does not match the recorded value.
    #[error("CRC-32 mismatch in {name}: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        name: String,
        expected: u32,
        actual: u32,
    },

    /// Content length does not match the recorded value.
    #[error("size mismatch in {name}: expected {expected}, got {actual}")]
    SizeMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },

    /// WinZip AES authentication code mismatch.
    #[error("authentication failed for {name}: content has been tampered with")]
    AuthenticationFailed { name: String },

    /// The password verifier did not match and the key provider gave up.
    #[error("wrong password for {name}")]
    WrongPassword { name: String },

    /// The key provider declined to supply a password.
    #[error("no password supplied for {name}")]
    KeyCancelled { name: String },

    /// An encrypted entry was met without a key provider.
    #[error("no key provider configured for encrypted entry {name}")]
    MissingKeyProvider { name: String },

    /// The key provider has no encryption parameters for a new entry.
    #[error("no encryption parameters available for {name}")]
    MissingParameters { name: String },

    /// Unsupported compression method.
    #[error("unsupported compression method {method} in {name}")]
    UnsupportedCompression { name: String, method: u16 },

    /// Encrypted with something other than WinZip AES.
    #[error("unsupported encryption scheme in {name}")]
    UnsupportedEncryption { name: String },

    /// Unknown WinZip AES key strength code.
    #[error("unsupported AES key strength code {0}")]
    UnsupportedKeyStrength(u8),

    /// Entry not found.
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// An entry with this name was already written.
    #[error("duplicate entry: {0}")]
    DuplicateEntry(String),

    /// Entry streams are still open.
    #[error("archive is busy with {open} open entry streams")]
    Busy { open: usize },

    /// The archive view has been closed.
    #[error("archive has been closed")]
    Closed,

    /// No entry is currently being written.
    #[error("no entry is open for writing")]
    NoOpenEntry,

    /// The writer has already been finished.
    #[error("writer has already been finished")]
    WriterFinished,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::Common(kovcheg_common::Error::Io(_)) => ErrorKind::Io,
            Self::Common(_) => ErrorKind::Format,
            Self::Entry { source, .. } => source.kind(),
            Self::InvalidSignature { .. }
            | Self::EocdNotFound
            | Self::MultiVolume
            | Self::Malformed { .. }
            | Self::EntryCountMismatch { .. }
            | Self::ExtraFieldOverrun { .. } => ErrorKind::Format,
            Self::CrcMismatch { .. } | Self::SizeMismatch { .. } => ErrorKind::Integrity,
            Self::AuthenticationFailed { .. } => ErrorKind::Authentication,
            Self::WrongPassword { .. } | Self::KeyCancelled { .. } => ErrorKind::Key,
            Self::MissingKeyProvider { .. } | Self::MissingParameters { .. } => {
                ErrorKind::Parameter
            }
            Self::UnsupportedCompression { .. }
            | Self::UnsupportedEncryption { .. }
            | Self::UnsupportedKeyStrength(_) => ErrorKind::Capability,
            Self::EntryNotFound(_)
            | Self::DuplicateEntry(_)
            | Self::Busy { .. }
            | Self::Closed
            | Self::NoOpenEntry
            | Self::WriterFinished => ErrorKind::State,
        }
    }

    /// Attribute this error to the named entry.
    pub(crate) fn in_entry(self, name: &str) -> Self {
        match self {
            err @ Self::Entry { .. } => err,
            err => Self::Entry {
                name: name.to_owned(),
                source: Box::new(err),
            },
        }
    }

    pub(crate) fn malformed(context: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            context,
            reason: reason.into(),
        }
    }
}

impl From<io::Error> for Error {
    /// Unwraps codec errors that travelled through an `io::Read`/`io::Write`
    /// boundary so the original variant survives.
    fn from(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            if let Some(inner) = err.into_inner() {
                return match inner.downcast::<Error>() {
                    Ok(err) => *err,
                    Err(other) => Self::Io(io::Error::new(io::ErrorKind::Other, other)),
                };
            }
            return Self::Io(io::Error::new(io::ErrorKind::Other, "wrapped codec error"));
        }
        Self::Io(err)
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(err) => err,
            err => io::Error::new(io::ErrorKind::InvalidData, err),
        }
    }
}

/// Result type for ZIP operations.
pub type Result<T> = std::result::Result<T, Error>;
