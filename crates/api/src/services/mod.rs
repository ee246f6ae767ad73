//! Application services sitting between the HTTP routes and persistence.

pub mod accounts;
pub mod transfer;

pub use accounts::{AccountError, AccountService};
pub use transfer::{TransferEngine, TransferError};
