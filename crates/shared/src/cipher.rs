//! RSA-OAEP (SHA-256) encryption of secrets.
//!
//! Ciphertexts travel as standard base64. Clients fetch the public key and
//! encrypt a password before sending it; the legacy reversible password
//! storage mode also goes through here.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use rsa::Oaep;
use sha2::Sha256;
use thiserror::Error;

use crate::keystore::KeyStore;

/// Error type for cipher operations.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("Failed to encrypt secret: {0}")]
    Encrypt(String),

    #[error("Ciphertext is not valid base64")]
    InvalidEncoding,

    #[error("Failed to decrypt secret")]
    Decrypt,

    #[error("Decrypted secret is not valid UTF-8")]
    InvalidPlaintext,
}

/// Prefix of the placeholder returned by [`SecretCipher::decrypt_or_sentinel`].
///
/// Secrets with control characters are rejected at registration, so a value
/// starting with NUL can never be a stored plaintext.
const SENTINEL_PREFIX: &str = "\0undecryptable:";

/// Encrypts and decrypts secrets with the key pair held by a [`KeyStore`].
#[derive(Debug, Clone)]
pub struct SecretCipher {
    keys: Arc<KeyStore>,
}

impl SecretCipher {
    pub fn new(keys: Arc<KeyStore>) -> Self {
        Self { keys }
    }

    /// Encrypts `plaintext` with the current public key.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let keys = self.keys.current();
        let mut rng = rand::thread_rng();

        let ciphertext = keys
            .public_key()
            .encrypt(&mut rng, Oaep::new::<Sha256>(), plaintext.as_bytes())
            .map_err(|e| CipherError::Encrypt(e.to_string()))?;

        Ok(STANDARD.encode(ciphertext))
    }

    /// Decrypts a base64 ciphertext produced by [`SecretCipher::encrypt`] or by a
    /// client holding the public key.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError> {
        let bytes = STANDARD
            .decode(ciphertext.trim())
            .map_err(|_| CipherError::InvalidEncoding)?;

        let keys = self.keys.current();
        let plaintext = keys
            .private_key()
            .decrypt(Oaep::new::<Sha256>(), &bytes)
            .map_err(|_| CipherError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::InvalidPlaintext)
    }

    /// Decrypts, or returns a random placeholder that matches no real secret.
    ///
    /// Used on the login path so that a bad ciphertext is indistinguishable
    /// from a wrong password.
    pub fn decrypt_or_sentinel(&self, ciphertext: &str) -> String {
        match self.decrypt(ciphertext) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::debug!(error = %e, "Secret decryption failed, substituting sentinel");
                sentinel()
            }
        }
    }

    /// SPKI PEM of the current public key.
    pub fn public_key_pem(&self) -> String {
        self.keys.current().public_pem().to_string()
    }

    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.keys
    }
}

fn sentinel() -> String {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    format!("{}{}", SENTINEL_PREFIX, hex::encode(nonce))
}

/// Whether `value` is a placeholder from [`SecretCipher::decrypt_or_sentinel`].
pub fn is_sentinel(value: &str) -> bool {
    value.starts_with(SENTINEL_PREFIX)
}
