//! WinZip AES encryption.
//!
//! WinZip AES wraps an entry's compressed content as
//! `salt || password verifier || ciphertext || authentication code`:
//!
//! - keys come from PBKDF2-HMAC-SHA1 (1000 rounds) over the password and salt
//! - the cipher is AES in a little-endian counter mode starting at 1
//! - the authentication code is HMAC-SHA1 over the ciphertext, truncated to
//!   10 bytes
//!
//! The same module serves the reader (decrypt + authenticate) and the writer
//! (encrypt + sign).

mod ctr;
mod keys;
mod penalty;
mod winzip;

pub use ctr::AesCtrKeyStream;
pub use keys::{AesParams, FnKeyProvider, KeyProvider, StaticKeyProvider};
pub use penalty::{Backoff, RetryPolicy};
pub(crate) use winzip::{authenticate, AesDecryptReader, AesEncryptor, DerivedKeys};
pub use winzip::{AUTH_CODE_LENGTH, PASSWORD_VERIFIER_LENGTH};

use crate::{Error, Result};

/// AES key strength of a WinZip AES entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum KeyStrength {
    /// 128 bit AES.
    Aes128 = 1,
    /// 192 bit AES.
    Aes192 = 2,
    /// 256 bit AES.
    #[default]
    Aes256 = 3,
}

impl KeyStrength {
    /// Code stored in the extra field.
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode the extra field code.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(Self::Aes128),
            2 => Ok(Self::Aes192),
            3 => Ok(Self::Aes256),
            other => Err(Error::UnsupportedKeyStrength(other)),
        }
    }

    /// Key length in bytes.
    #[inline]
    pub fn key_len(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }

    /// Key length in bits.
    #[inline]
    pub fn bits(self) -> usize {
        self.key_len() * 8
    }

    /// Salt length in bytes: half the key length.
    #[inline]
    pub fn salt_len(self) -> usize {
        self.key_len() / 2
    }

    /// Bytes the encryption wrapper adds around the ciphertext.
    #[inline]
    pub fn overhead(self) -> u64 {
        (self.salt_len() + PASSWORD_VERIFIER_LENGTH + AUTH_CODE_LENGTH) as u64
    }
}

/// WinZip AES vendor version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum AesVendorVersion {
    /// AE-1: the CRC-32 field is kept.
    Ae1 = 1,
    /// AE-2: the CRC-32 field is zero.
    Ae2 = 2,
}

impl AesVendorVersion {
    /// Plaintext below this size is written as AE-2.
    pub const AE2_THRESHOLD: u64 = 20;

    /// Whether entries of this version carry a meaningful CRC-32.
    #[inline]
    pub fn keeps_crc(self) -> bool {
        matches!(self, Self::Ae1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_strength_lengths() {
        assert_eq!(KeyStrength::Aes128.salt_len(), 8);
        assert_eq!(KeyStrength::Aes192.salt_len(), 12);
        assert_eq!(KeyStrength::Aes256.salt_len(), 16);
        assert_eq!(KeyStrength::Aes256.bits(), 256);
        assert_eq!(KeyStrength::Aes256.overhead(), 28);
    }

    #[test]
    fn test_key_strength_codes() {
        assert_eq!(KeyStrength::from_code(2).unwrap(), KeyStrength::Aes192);
        assert!(matches!(
            KeyStrength::from_code(4),
            Err(Error::UnsupportedKeyStrength(4))
        ));
    }
}
