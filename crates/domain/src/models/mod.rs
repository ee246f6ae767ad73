//! Domain models for Teller.

pub mod account;
pub mod transfer;

pub use account::{
    Account, AccountProjection, IdentityField, LoginCommand, NewAccount, RegisterCommand,
    SealedSecret, StoredCredential,
};
pub use transfer::{TransferCommand, TransferReceipt, TransferRuleError, TransferStrategy};
