//! Offset mapping between recorded and real positions.

use crate::{Error, Result};

/// Translates offsets recorded in ZIP metadata to byte positions in the
/// source, and back.
///
/// Archives whose recorded offsets ignore a preamble (for example a stub
/// prepended to an existing archive) are read with `Shifted(preamble)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetMapper {
    #[default]
    Identity,
    Shifted(u64),
}

impl OffsetMapper {
    /// Mapper for a constant shift; zero is the identity.
    pub fn with_shift(shift: u64) -> Self {
        if shift == 0 {
            Self::Identity
        } else {
            Self::Shifted(shift)
        }
    }

    #[inline]
    pub fn shift(self) -> u64 {
        match self {
            Self::Identity => 0,
            Self::Shifted(shift) => shift,
        }
    }

    /// Recorded offset to real position.
    pub fn map(self, recorded: u64) -> Result<u64> {
        recorded.checked_add(self.shift()).ok_or_else(|| {
            Error::malformed("offset", format!("{recorded} overflows when mapped"))
        })
    }

    /// Real position to recorded offset.
    pub fn unmap(self, real: u64) -> Result<u64> {
        real.checked_sub(self.shift()).ok_or_else(|| {
            Error::malformed(
                "offset",
                format!("position {real} precedes the shifted origin {}", self.shift()),
            )
        })
    }
}
