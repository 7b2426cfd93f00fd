//! WinZip AES key derivation, encryption and authentication.

use std::io::{self, Read};

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;

use super::{AesCtrKeyStream, AesParams, KeyStrength};
use crate::source::ReadAt;
use crate::{Error, Result};

/// The length of the password verification value in bytes
pub const PASSWORD_VERIFIER_LENGTH: usize = 2;
/// The length of the authentication code in bytes
pub const AUTH_CODE_LENGTH: usize = 10;
/// The number of iterations used with PBKDF2
const ITERATION_COUNT: u32 = 1000;
/// Chunk size used when re-reading ciphertext for authentication
const AUTH_CHUNK: usize = 64 * 1024;

type HmacSha1 = Hmac<Sha1>;

/// Keys derived from a password and salt.
pub(crate) struct DerivedKeys {
    strength: KeyStrength,
    cipher_key: Vec<u8>,
    mac_key: Vec<u8>,
    verifier: [u8; PASSWORD_VERIFIER_LENGTH],
}

impl DerivedKeys {
    /// Run PBKDF2 over `password` and `salt`.
    ///
    /// The output is `2 * key_len + 2` bytes: the cipher key, then the HMAC
    /// key, then the password verifier.
    pub fn derive(password: &[u8], salt: &[u8], strength: KeyStrength) -> Self {
        let key_len = strength.key_len();
        let mut derived = vec![0u8; 2 * key_len + PASSWORD_VERIFIER_LENGTH];
        pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, ITERATION_COUNT, &mut derived);

        let mut verifier = [0u8; PASSWORD_VERIFIER_LENGTH];
        verifier.copy_from_slice(&derived[2 * key_len..]);
        Self {
            strength,
            cipher_key: derived[..key_len].to_vec(),
            mac_key: derived[key_len..2 * key_len].to_vec(),
            verifier,
        }
    }

    /// Compare against a stored password verifier.
    ///
    /// Only 16 bits: passing this check does not prove the password right.
    pub fn verifies(&self, stored: &[u8]) -> bool {
        self.verifier[..] == *stored
    }

    pub fn verifier(&self) -> [u8; PASSWORD_VERIFIER_LENGTH] {
        self.verifier
    }

    pub fn key_stream(&self) -> Result<AesCtrKeyStream> {
        AesCtrKeyStream::new(self.strength, &self.cipher_key)
            .ok_or(Error::UnsupportedKeyStrength(self.strength.code()))
    }

    fn mac(&self) -> Result<HmacSha1> {
        <HmacSha1 as Mac>::new_from_slice(&self.mac_key)
            .map_err(|_| Error::UnsupportedKeyStrength(self.strength.code()))
    }
}

/// Encrypts and signs an entry's compressed content.
pub(crate) struct AesEncryptor {
    salt: Vec<u8>,
    verifier: [u8; PASSWORD_VERIFIER_LENGTH],
    stream: AesCtrKeyStream,
    mac: HmacSha1,
    header_written: bool,
}

impl AesEncryptor {
    /// Derive fresh keys from `params` with a random salt.
    pub fn new(params: &AesParams) -> Result<Self> {
        let mut salt = vec![0u8; params.key_strength.salt_len()];
        rand::thread_rng().fill_bytes(&mut salt);
        Self::with_salt(params, salt)
    }

    pub fn with_salt(params: &AesParams, salt: Vec<u8>) -> Result<Self> {
        let keys = DerivedKeys::derive(&params.password, &salt, params.key_strength);
        Ok(Self {
            verifier: keys.verifier(),
            stream: keys.key_stream()?,
            mac: keys.mac()?,
            salt,
            header_written: false,
        })
    }

    fn write_header(&mut self, output: &mut Vec<u8>) {
        if !self.header_written {
            output.extend_from_slice(&self.salt);
            output.extend_from_slice(&self.verifier);
            self.header_written = true;
        }
    }

    /// Encrypt `input`, appending salt and verifier before the first bytes.
    pub fn update(&mut self, input: &[u8], output: &mut Vec<u8>) {
        self.write_header(output);
        let start = output.len();
        output.extend_from_slice(input);
        self.stream.crypt(&mut output[start..]);
        self.mac.update(&output[start..]);
    }

    /// Append the truncated authentication code.
    pub fn finish(&mut self, output: &mut Vec<u8>) {
        self.write_header(output);
        let tag = self.mac.clone().finalize().into_bytes();
        output.extend_from_slice(&tag[..AUTH_CODE_LENGTH]);
    }
}

/// Decrypts ciphertext read from `inner`.
pub(crate) struct AesDecryptReader<R> {
    inner: R,
    stream: AesCtrKeyStream,
}

impl<R: Read> AesDecryptReader<R> {
    pub fn new(inner: R, keys: &DerivedKeys) -> Result<Self> {
        Ok(Self {
            inner,
            stream: keys.key_stream()?,
        })
    }
}

impl<R: Read> Read for AesDecryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.stream.crypt(&mut buf[..n]);
        Ok(n)
    }
}

/// Recompute the HMAC over `len` bytes of ciphertext at `offset` and compare
/// it with the stored authentication code.
pub(crate) fn authenticate(
    source: &dyn ReadAt,
    offset: u64,
    len: u64,
    keys: &DerivedKeys,
    stored: &[u8],
    name: &str,
) -> Result<()> {
    let mut mac = keys.mac()?;
    let mut buf = vec![0u8; AUTH_CHUNK.min(len as usize)];
    let mut pos = 0u64;
    while pos < len {
        let n = (len - pos).min(buf.len() as u64) as usize;
        source.read_exact_at(offset + pos, &mut buf[..n])?;
        mac.update(&buf[..n]);
        pos += n as u64;
    }
    mac.verify_truncated_left(stored)
        .map_err(|_| Error::AuthenticationFailed {
            name: name.to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encrypt(params: &AesParams, plaintext: &[u8]) -> Vec<u8> {
        let mut encryptor = AesEncryptor::with_salt(params, vec![3u8; params.key_strength.salt_len()]).unwrap();
        let mut out = Vec::new();
        for chunk in plaintext.chunks(7) {
            encryptor.update(chunk, &mut out);
        }
        encryptor.finish(&mut out);
        out
    }

    #[test]
    fn test_wrapper_layout() {
        let params = AesParams::new("pw", KeyStrength::Aes128);
        let out = encrypt(&params, b"hello world");
        assert_eq!(out.len() as u64, 11 + KeyStrength::Aes128.overhead());
        assert_eq!(&out[..8], &[3u8; 8]);
    }

    #[test]
    fn test_decrypt_and_authenticate() {
        let params = AesParams::new("pw", KeyStrength::Aes256);
        let plaintext = b"The quick brown fox jumps over the lazy dog";
        let out = encrypt(&params, plaintext);

        let salt = &out[..16];
        let keys = DerivedKeys::derive(b"pw", salt, KeyStrength::Aes256);
        assert!(keys.verifies(&out[16..18]));

        let body = &out[18..out.len() - AUTH_CODE_LENGTH];
        let mut decrypted = Vec::new();
        AesDecryptReader::new(body, &keys)
            .unwrap()
            .read_to_end(&mut decrypted)
            .unwrap();
        assert_eq!(decrypted, plaintext);

        let tag = &out[out.len() - AUTH_CODE_LENGTH..];
        authenticate(&out, 18, body.len() as u64, &keys, tag, "fox").unwrap();

        let mut tampered = out.clone();
        tampered[20] ^= 1;
        let err = authenticate(&tampered, 18, body.len() as u64, &keys, tag, "fox").unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed { .. }));
    }

    #[test]
    fn test_wrong_password_fails_verifier() {
        let salt = [9u8; 16];
        let right = DerivedKeys::derive(b"right", &salt, KeyStrength::Aes256);
        let wrong = DerivedKeys::derive(b"wrong", &salt, KeyStrength::Aes256);
        assert!(right.verifies(&right.verifier()));
        // 16-bit verifiers can collide; these two are known not to.
        assert_ne!(right.verifier(), wrong.verifier());
    }
}
