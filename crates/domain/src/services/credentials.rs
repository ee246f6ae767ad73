//! Sealing and checking account secrets.
//!
//! Wraps the Argon2id hasher and the RSA-OAEP cipher from `shared` behind one
//! async interface. All of the work is CPU bound and runs on the blocking pool.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use shared::cipher::SecretCipher;
use shared::password::{PasswordError, SecretHasher};
use thiserror::Error;
use tokio::task;

use crate::models::{SealedSecret, StoredCredential};

/// How new secrets are stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordStorage {
    /// One-way Argon2id digest.
    #[default]
    Hash,
    /// Reversible RSA-OAEP ciphertext. Legacy only.
    Cipher,
}

impl FromStr for PasswordStorage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hash" => Ok(PasswordStorage::Hash),
            "cipher" => Ok(PasswordStorage::Cipher),
            _ => Err(format!("Invalid password storage mode: {}", s)),
        }
    }
}

/// Error type for credential codec operations.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error("Failed to encrypt secret: {0}")]
    Cipher(String),

    #[error("Stored credential is corrupt")]
    CorruptCredential,

    #[error("Blocking task failed: {0}")]
    Join(#[from] task::JoinError),
}

/// Seals new secrets and checks submitted ones against stored credentials.
#[derive(Debug, Clone)]
pub struct CredentialCodec {
    hasher: SecretHasher,
    cipher: SecretCipher,
    storage: PasswordStorage,
}

impl CredentialCodec {
    pub fn new(hasher: SecretHasher, cipher: SecretCipher, storage: PasswordStorage) -> Self {
        Self {
            hasher,
            cipher,
            storage,
        }
    }

    pub fn storage(&self) -> PasswordStorage {
        self.storage
    }

    pub fn cipher(&self) -> &SecretCipher {
        &self.cipher
    }

    /// Produces the stored form of a new secret according to the storage mode.
    pub async fn seal(&self, secret: &str) -> Result<SealedSecret, CodecError> {
        let secret = secret.to_owned();
        match self.storage {
            PasswordStorage::Hash => {
                let hasher = self.hasher.clone();
                let digest = task::spawn_blocking(move || hasher.hash(&secret)).await??;
                Ok(SealedSecret {
                    password_hash: Some(digest),
                    password_cipher: None,
                })
            }
            PasswordStorage::Cipher => {
                let cipher = self.cipher.clone();
                let ciphertext = task::spawn_blocking(move || cipher.encrypt(&secret))
                    .await?
                    .map_err(|e| CodecError::Cipher(e.to_string()))?;
                Ok(SealedSecret {
                    password_hash: None,
                    password_cipher: Some(ciphertext),
                })
            }
        }
    }

    /// Checks a plaintext secret against a stored credential.
    ///
    /// A digest or ciphertext that cannot be parsed is [`CodecError::CorruptCredential`].
    pub async fn matches(
        &self,
        secret: &str,
        credential: StoredCredential<'_>,
    ) -> Result<bool, CodecError> {
        let secret = secret.to_owned();
        match credential {
            StoredCredential::Digest(digest) => {
                let hasher = self.hasher.clone();
                let digest = digest.to_owned();
                let outcome = task::spawn_blocking(move || hasher.verify(&secret, &digest)).await?;
                match outcome {
                    Ok(matched) => Ok(matched),
                    Err(PasswordError::InvalidHashFormat) => Err(CodecError::CorruptCredential),
                    Err(e) => Err(e.into()),
                }
            }
            StoredCredential::Cipher(ciphertext) => {
                let cipher = self.cipher.clone();
                let hasher = self.hasher.clone();
                let ciphertext = ciphertext.to_owned();
                let outcome = task::spawn_blocking(move || {
                    // Costs as much as an unknown account, which runs a dummy digest check.
                    hasher.verify_dummy(&secret);
                    cipher.decrypt(&ciphertext).map(|stored| {
                        shared::crypto::constant_time_eq(stored.as_bytes(), secret.as_bytes())
                    })
                })
                .await?;
                outcome.map_err(|_| CodecError::CorruptCredential)
            }
        }
    }

    /// Burns the same time as a real check when there is nothing to check against.
    pub async fn matches_nothing(&self, secret: &str) -> Result<bool, CodecError> {
        let hasher = self.hasher.clone();
        let secret = secret.to_owned();
        Ok(task::spawn_blocking(move || hasher.verify_dummy(&secret)).await?)
    }

    /// Decrypts a secret sent encrypted with the public key.
    ///
    /// Never fails: an undecryptable value becomes a sentinel that matches nothing.
    pub async fn open_transport_secret(&self, ciphertext: &str) -> Result<String, CodecError> {
        let cipher = self.cipher.clone();
        let ciphertext = ciphertext.to_owned();
        Ok(task::spawn_blocking(move || cipher.decrypt_or_sentinel(&ciphertext)).await?)
    }
}
