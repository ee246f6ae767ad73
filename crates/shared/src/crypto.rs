//! Small hashing and comparison helpers.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Computes SHA-256 of the input and returns it as a hex string.
pub fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

/// Short, log-safe fingerprint of a public key (first 16 hex chars of its SHA-256).
pub fn key_fingerprint(public_key_pem: &str) -> String {
    sha256_hex(public_key_pem.as_bytes())[..16].to_string()
}

/// Compares two byte strings without short-circuiting on the first difference.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
