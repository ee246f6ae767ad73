//! Domain layer for the Teller backend.
//!
//! This crate contains:
//! - Domain models (Account, Transfer) and validated commands
//! - The credential codec and the login state machine
//! - Domain error types

pub mod models;
pub mod services;
