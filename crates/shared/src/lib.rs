//! Shared utilities and common types for the Teller backend.
//!
//! This crate provides the credential primitives used across all other crates:
//! - Password hashing with Argon2id
//! - RSA-OAEP secret encryption backed by a persisted key pair
//! - JWT issuance and verification
//! - Common validation logic

pub mod cipher;
pub mod crypto;
pub mod jwt;
pub mod keystore;
pub mod password;
pub mod validation;
