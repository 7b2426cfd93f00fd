//! Password and parameter suppliers for encrypted entries.

use super::KeyStrength;

/// Parameters for encrypting a new entry.
#[derive(Clone, PartialEq, Eq)]
pub struct AesParams {
    /// Password bytes fed to PBKDF2.
    pub password: Vec<u8>,
    /// AES key strength.
    pub key_strength: KeyStrength,
}

impl AesParams {
    pub fn new(password: impl Into<Vec<u8>>, key_strength: KeyStrength) -> Self {
        Self {
            password: password.into(),
            key_strength,
        }
    }
}

impl std::fmt::Debug for AesParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesParams")
            .field("password", &"<redacted>")
            .field("key_strength", &self.key_strength)
            .finish()
    }
}

/// Supplies passwords for reading and parameters for writing encrypted entries.
pub trait KeyProvider: Send + Sync {
    /// Parameters to encrypt the named entry with, or `None` if there are none.
    fn write_key(&self, entry: &str) -> Option<AesParams>;

    /// Password to decrypt the named entry with.
    ///
    /// `invalid` is set when the previous password for this entry failed
    /// verification. Returning `None` gives up.
    fn read_key(&self, entry: &str, invalid: bool) -> Option<Vec<u8>>;
}

/// Uses one fixed password for every entry.
///
/// A rejected password is never offered twice, so a wrong password fails
/// after the first attempt.
#[derive(Debug, Clone)]
pub struct StaticKeyProvider {
    params: AesParams,
}

impl StaticKeyProvider {
    pub fn new(password: impl Into<Vec<u8>>) -> Self {
        Self::with_strength(password, KeyStrength::default())
    }

    pub fn with_strength(password: impl Into<Vec<u8>>, key_strength: KeyStrength) -> Self {
        Self {
            params: AesParams::new(password, key_strength),
        }
    }
}

impl KeyProvider for StaticKeyProvider {
    fn write_key(&self, _entry: &str) -> Option<AesParams> {
        Some(self.params.clone())
    }

    fn read_key(&self, _entry: &str, invalid: bool) -> Option<Vec<u8>> {
        (!invalid).then(|| self.params.password.clone())
    }
}

/// Adapts a closure as a read-only key provider, e.g. an interactive prompt.
pub struct FnKeyProvider<F> {
    prompt: F,
}

impl<F> FnKeyProvider<F>
where
    F: Fn(&str, bool) -> Option<Vec<u8>> + Send + Sync,
{
    pub fn new(prompt: F) -> Self {
        Self { prompt }
    }
}

impl<F> KeyProvider for FnKeyProvider<F>
where
    F: Fn(&str, bool) -> Option<Vec<u8>> + Send + Sync,
{
    fn write_key(&self, _entry: &str) -> Option<AesParams> {
        None
    }

    fn read_key(&self, entry: &str, invalid: bool) -> Option<Vec<u8>> {
        (self.prompt)(entry, invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_provider_gives_up_after_rejection() {
        let provider = StaticKeyProvider::new("secret");
        assert_eq!(provider.read_key("a", false).as_deref(), Some(&b"secret"[..]));
        assert_eq!(provider.read_key("a", true), None);
        assert_eq!(
            provider.write_key("a").unwrap().key_strength,
            KeyStrength::Aes256
        );
    }

    #[test]
    fn test_params_debug_hides_password() {
        let params = AesParams::new("hunter2", KeyStrength::Aes128);
        assert!(!format!("{params:?}").contains("hunter2"));
    }
}
