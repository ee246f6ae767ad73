//! One-way secret hashing using Argon2id.
//!
//! Digests are PHC strings, so every digest carries its own salt and cost
//! parameters. Verification always uses the parameters embedded in the digest,
//! which keeps old digests valid when the configured cost changes.

use std::sync::OnceLock;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use thiserror::Error;

/// Error type for password operations.
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    HashError(String),

    #[error("Failed to verify password: {0}")]
    VerifyError(String),

    #[error("Invalid password hash format")]
    InvalidHashFormat,
}

/// Argon2id cost parameters.
///
/// The default follows the OWASP recommendation (19 MiB, 2 iterations, 1 lane),
/// which costs more than bcrypt with 12 rounds on commodity hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashingParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashingParams {
    fn default() -> Self {
        Self {
            memory_kib: 19456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

const OUTPUT_LEN: usize = 32;

const DUMMY_SECRET: &str = "teller-dummy-credential";

/// Hashes and verifies secrets with a fixed set of Argon2id parameters.
#[derive(Clone)]
pub struct SecretHasher {
    argon2: Argon2<'static>,
    dummy_digest: std::sync::Arc<OnceLock<String>>,
}

impl std::fmt::Debug for SecretHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretHasher").finish_non_exhaustive()
    }
}

impl Default for SecretHasher {
    fn default() -> Self {
        // argon2's own defaults are the OWASP parameters above.
        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, Params::default()),
            dummy_digest: Default::default(),
        }
    }
}

impl SecretHasher {
    /// Creates a hasher, rejecting parameters Argon2 considers invalid.
    pub fn new(params: HashingParams) -> Result<Self, PasswordError> {
        let params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            Some(OUTPUT_LEN),
        )
        .map_err(|e| PasswordError::HashError(format!("Failed to create Argon2 params: {}", e)))?;

        let hasher = Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            dummy_digest: Default::default(),
        };
        // Ready before the first login.
        let dummy = hasher.hash(DUMMY_SECRET)?;
        let _ = hasher.dummy_digest.set(dummy);
        Ok(hasher)
    }

    /// Hashes a secret with a fresh random salt.
    ///
    /// # Example
    /// ```
    /// use shared::password::SecretHasher;
    ///
    /// let digest = SecretHasher::default().hash("my_secure_password").unwrap();
    /// assert!(digest.starts_with("$argon2id$"));
    /// ```
    pub fn hash(&self, secret: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);

        self.argon2
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| PasswordError::HashError(e.to_string()))
    }

    /// Verifies a secret against a stored digest in constant time.
    ///
    /// A digest that does not parse is an error rather than a mismatch, so a
    /// corrupted row never looks like a wrong password to the caller.
    pub fn verify(&self, secret: &str, digest: &str) -> Result<bool, PasswordError> {
        let parsed = PasswordHash::new(digest).map_err(|_| PasswordError::InvalidHashFormat)?;

        match Argon2::default().verify_password(secret.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(PasswordError::VerifyError(e.to_string())),
        }
    }

    /// Runs a full verification against a throwaway digest and returns `false`.
    ///
    /// Used when there is no stored credential to compare against, so that the
    /// caller spends the same time as a real mismatch.
    pub fn verify_dummy(&self, secret: &str) -> bool {
        let digest = self
            .dummy_digest
            .get_or_init(|| self.hash(DUMMY_SECRET).unwrap_or_default());
        let _ = self.verify(secret, digest);
        false
    }
}

/// Hashes a password with the default parameters.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    SecretHasher::default().hash(password)
}

/// Verifies a password against a PHC digest.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    SecretHasher::default().verify(password, hash)
}
