//! WinZip flavoured AES-CTR.

use cipher::{BlockEncrypt, KeyInit};

use super::KeyStrength;

/// Internal block size of an AES cipher.
const AES_BLOCK_SIZE: usize = 16;

enum Cipher {
    Aes128(aes::Aes128),
    Aes192(aes::Aes192),
    Aes256(aes::Aes256),
}

impl Cipher {
    fn new(strength: KeyStrength, key: &[u8]) -> Option<Self> {
        Some(match strength {
            KeyStrength::Aes128 => Self::Aes128(aes::Aes128::new_from_slice(key).ok()?),
            KeyStrength::Aes192 => Self::Aes192(aes::Aes192::new_from_slice(key).ok()?),
            KeyStrength::Aes256 => Self::Aes256(aes::Aes256::new_from_slice(key).ok()?),
        })
    }

    fn encrypt_block(&self, block: &mut aes::Block) {
        match self {
            Self::Aes128(c) => c.encrypt_block(block),
            Self::Aes192(c) => c.encrypt_block(block),
            Self::Aes256(c) => c.encrypt_block(block),
        }
    }
}

/// An AES-CTR key stream generator.
///
/// Implements the slightly non-standard AES-CTR variant used by WinZip AES encryption.
///
/// Typical AES-CTR implementations combine a nonce with a 64 bit counter. WinZip AES instead uses
/// no nonce, starts counting at 1 and stores the counter little endian rather than big endian.
///
/// Encryption and decryption are the same operation: XOR-ing the key stream into the data.
pub struct AesCtrKeyStream {
    /// Current AES counter.
    counter: u128,
    /// AES cipher instance.
    cipher: Cipher,
    /// Stores the currently available keystream bytes.
    buffer: [u8; AES_BLOCK_SIZE],
    /// Number of bytes already used up from `buffer`.
    pos: usize,
}

impl std::fmt::Debug for AesCtrKeyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesCtrKeyStream")
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

impl AesCtrKeyStream {
    /// Creates a new key stream, or `None` if `key` has the wrong length.
    pub fn new(strength: KeyStrength, key: &[u8]) -> Option<Self> {
        Some(Self {
            counter: 1,
            cipher: Cipher::new(strength, key)?,
            buffer: [0u8; AES_BLOCK_SIZE],
            pos: AES_BLOCK_SIZE,
        })
    }

    /// Decrypt or encrypt given data in place.
    pub fn crypt(&mut self, mut target: &mut [u8]) {
        while !target.is_empty() {
            if self.pos == AES_BLOCK_SIZE {
                let mut block = aes::Block::clone_from_slice(&self.counter.to_le_bytes());
                self.cipher.encrypt_block(&mut block);
                self.buffer.copy_from_slice(&block);
                self.counter = self.counter.wrapping_add(1);
                self.pos = 0;
            }

            let target_len = target.len().min(AES_BLOCK_SIZE - self.pos);

            xor(
                &mut target[..target_len],
                &self.buffer[self.pos..self.pos + target_len],
            );
            target = &mut target[target_len..];
            self.pos += target_len;
        }
    }
}

/// XORs a slice in place with another slice.
#[inline]
fn xor(dest: &mut [u8], src: &[u8]) {
    debug_assert_eq!(dest.len(), src.len());

    for (lhs, rhs) in dest.iter_mut().zip(src.iter()) {
        *lhs ^= *rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypt_simple_example() {
        let ciphertext: [u8; 5] = [0xdc, 0x99, 0x93, 0x5e, 0xbf];
        let expected_plaintext = b"asdf\n";
        let key = [
            0xd1, 0x51, 0xa6, 0xab, 0x53, 0x68, 0xd7, 0xb7, 0xbf, 0x49, 0xf7, 0xf5, 0x8a, 0x4e,
            0x10, 0x36, 0x25, 0x1c, 0x13, 0xba, 0x12, 0x45, 0x37, 0x65, 0xa9, 0xe4, 0xed, 0x9f,
            0x4a, 0xa8, 0xda, 0x3b,
        ];

        let mut key_stream = AesCtrKeyStream::new(KeyStrength::Aes256, &key).unwrap();

        let mut plaintext = ciphertext;
        key_stream.crypt(&mut plaintext);
        assert_eq!(&plaintext, expected_plaintext);

        // Round-tripping should yield the ciphertext again.
        let mut key_stream = AesCtrKeyStream::new(KeyStrength::Aes256, &key).unwrap();
        key_stream.crypt(&mut plaintext);
        assert_eq!(plaintext, ciphertext);
    }

    #[test]
    fn crypt_is_independent_of_chunking() {
        let key = [7u8; 16];
        let mut whole = vec![0u8; 70];
        AesCtrKeyStream::new(KeyStrength::Aes128, &key)
            .unwrap()
            .crypt(&mut whole);

        let mut pieces = vec![0u8; 70];
        let mut stream = AesCtrKeyStream::new(KeyStrength::Aes128, &key).unwrap();
        for chunk in pieces.chunks_mut(13) {
            stream.crypt(chunk);
        }
        assert_eq!(whole, pieces);
    }

    #[test]
    fn rejects_wrong_key_length() {
        assert!(AesCtrKeyStream::new(KeyStrength::Aes192, &[0u8; 16]).is_none());
    }
}
