//! Database entity definitions.

pub mod account;

pub use account::AccountEntity;
