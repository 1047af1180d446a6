use fernet::Fernet;
use zeroize::{Zeroize, Zeroizing};

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Invalid Fernet key: expected 32 url-safe base64 encoded bytes")]
    InvalidKey,
    #[error("Failed to decrypt stored password")]
    Decrypt,
    #[error("Decrypted password is not valid UTF-8")]
    NotUtf8,
}

/// Symmetric encryption for investor passwords at rest.
pub struct PasswordVault {
    fernet: Fernet,
}

impl PasswordVault {
    pub fn new(key: &str) -> Result<Self, VaultError> {
        let fernet = Fernet::new(key.trim()).ok_or(VaultError::InvalidKey)?;
        Ok(Self { fernet })
    }

    /// A fresh random key in the encoding [`PasswordVault::new`] accepts.
    pub fn generate_key() -> String {
        Fernet::generate_key()
    }

    /// Empty plaintext maps to an empty token.
    pub fn encrypt(&self, plaintext: &str) -> String {
        if plaintext.is_empty() {
            return String::new();
        }
        self.fernet.encrypt(plaintext.as_bytes())
    }

    pub fn decrypt(&self, token: &str) -> Result<Zeroizing<String>, VaultError> {
        if token.is_empty() {
            return Ok(Zeroizing::new(String::new()));
        }
        let bytes = self.fernet.decrypt(token).map_err(|_| VaultError::Decrypt)?;
        String::from_utf8(bytes).map(Zeroizing::new).map_err(|e| {
            e.into_bytes().zeroize();
            VaultError::NotUtf8
        })
    }
}
