//! Persistence layer for the Teller backend.
//!
//! This crate contains:
//! - Database connection management
//! - Entity definitions (database row mappings)
//! - Repository implementations
//! - Transaction helpers with per-transaction timeouts

pub mod db;
pub mod entities;
pub mod metrics;
pub mod repositories;
pub mod transaction;
