//! Persisted RSA key pair used for secret encryption.
//!
//! The pair lives in a key directory as `private.pem` (PKCS#8) and
//! `public.pem` (SPKI). It is loaded once on startup and regenerated only when
//! the files are missing or do not parse. An existing key file that cannot be
//! read is fatal and never overwritten. Writing the files is best effort: a
//! failure is logged and the store keeps serving the in-memory pair.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use thiserror::Error;

use crate::crypto::key_fingerprint;

/// Modulus size for generated keys.
pub const KEY_BITS: usize = 2048;

const PRIVATE_KEY_FILE: &str = "private.pem";
const PUBLIC_KEY_FILE: &str = "public.pem";

/// Error type for key material operations.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("Failed to generate key pair: {0}")]
    Generate(String),

    #[error("Failed to encode key: {0}")]
    Encode(String),

    #[error("Failed to decode key: {0}")]
    Decode(String),

    #[error("Failed to persist key material: {0}")]
    Io(#[from] std::io::Error),
}

/// An immutable RSA key pair with its encoded public half.
pub struct KeyMaterial {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    public_pem: String,
    fingerprint: String,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("fingerprint", &self.fingerprint)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

impl KeyMaterial {
    /// Generates a fresh key pair.
    pub fn generate() -> Result<Self, KeyStoreError> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, KEY_BITS)
            .map_err(|e| KeyStoreError::Generate(e.to_string()))?;
        Self::from_private_key(private_key)
    }

    /// Parses a PKCS#8 PEM private key and derives the public half from it.
    pub fn from_private_pem(pem: &str) -> Result<Self, KeyStoreError> {
        let private_key =
            RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| KeyStoreError::Decode(e.to_string()))?;
        Self::from_private_key(private_key)
    }

    fn from_private_key(private_key: RsaPrivateKey) -> Result<Self, KeyStoreError> {
        let public_key = RsaPublicKey::from(&private_key);
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyStoreError::Encode(e.to_string()))?;
        let fingerprint = key_fingerprint(&public_pem);

        Ok(Self {
            private_key,
            public_key,
            public_pem,
            fingerprint,
        })
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// SPKI PEM of the public key.
    pub fn public_pem(&self) -> &str {
        &self.public_pem
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn private_pem(&self) -> Result<String, KeyStoreError> {
        self.private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.as_str().to_owned())
            .map_err(|e| KeyStoreError::Encode(e.to_string()))
    }
}

/// Holds the current key pair and swaps it atomically on rotation.
///
/// Readers clone the inner `Arc`, so an encrypt or decrypt that started before
/// a rotation finishes with the pair it started with.
#[derive(Debug)]
pub struct KeyStore {
    dir: Option<PathBuf>,
    current: RwLock<Arc<KeyMaterial>>,
}

impl KeyStore {
    /// Loads the pair from `dir`, generating and persisting a new one if needed.
    ///
    /// Fails when keys cannot be generated, or when a stored private key exists
    /// but cannot be read. An unreadable key file is never replaced.
    pub fn load_or_generate(dir: impl AsRef<Path>) -> Result<Self, KeyStoreError> {
        let dir = dir.as_ref().to_path_buf();

        let material = match load_from_dir(&dir) {
            Ok(Some(material)) => {
                tracing::info!(
                    key_dir = %dir.display(),
                    fingerprint = material.fingerprint(),
                    "Loaded encryption key pair"
                );
                material
            }
            Ok(None) => {
                tracing::info!(key_dir = %dir.display(), "No key pair found, generating one");
                generate_and_persist(&dir)?
            }
            Err(KeyStoreError::Decode(e)) => {
                tracing::warn!(
                    key_dir = %dir.display(),
                    error = %e,
                    "Stored key pair does not parse, regenerating"
                );
                generate_and_persist(&dir)?
            }
            Err(e) => {
                tracing::error!(
                    key_dir = %dir.display(),
                    error = %e,
                    "Stored key pair exists but cannot be read"
                );
                return Err(e);
            }
        };

        Ok(Self {
            dir: Some(dir),
            current: RwLock::new(Arc::new(material)),
        })
    }

    /// Creates a store whose pair only lives for this process.
    pub fn ephemeral() -> Result<Self, KeyStoreError> {
        Ok(Self::from_material(KeyMaterial::generate()?))
    }

    /// Wraps existing key material without a backing directory.
    pub fn from_material(material: KeyMaterial) -> Self {
        Self {
            dir: None,
            current: RwLock::new(Arc::new(material)),
        }
    }

    /// Returns the pair in use right now.
    pub fn current(&self) -> Arc<KeyMaterial> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the pair with a freshly generated one.
    pub fn rotate(&self) -> Result<Arc<KeyMaterial>, KeyStoreError> {
        let material = match &self.dir {
            Some(dir) => generate_and_persist(dir)?,
            None => KeyMaterial::generate()?,
        };
        let material = Arc::new(material);

        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = material.clone();

        tracing::info!(fingerprint = material.fingerprint(), "Rotated encryption key pair");
        Ok(material)
    }
}

fn load_from_dir(dir: &Path) -> Result<Option<KeyMaterial>, KeyStoreError> {
    let private_path = dir.join(PRIVATE_KEY_FILE);
    if !private_path.exists() {
        return Ok(None);
    }

    let pem = fs::read_to_string(&private_path)?;
    KeyMaterial::from_private_pem(&pem).map(Some)
}

fn generate_and_persist(dir: &Path) -> Result<KeyMaterial, KeyStoreError> {
    let material = KeyMaterial::generate()?;

    if let Err(e) = persist(dir, &material) {
        tracing::warn!(
            key_dir = %dir.display(),
            error = %e,
            "Failed to persist key pair, continuing with in-memory keys"
        );
    } else {
        tracing::info!(
            key_dir = %dir.display(),
            fingerprint = material.fingerprint(),
            "Persisted new encryption key pair"
        );
    }

    Ok(material)
}

fn persist(dir: &Path, material: &KeyMaterial) -> Result<(), KeyStoreError> {
    create_private_dir(dir)?;
    write_owner_only(&dir.join(PRIVATE_KEY_FILE), material.private_pem()?.as_bytes())?;
    write_owner_only(&dir.join(PUBLIC_KEY_FILE), material.public_pem().as_bytes())?;
    Ok(())
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}

/// Writes through a temp file and renames it so readers never see half a key.
fn write_owner_only(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("pem.tmp");

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
    }

    fs::rename(&tmp, path)
}
