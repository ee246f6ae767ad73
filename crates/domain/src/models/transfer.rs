//! Balance transfer models.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// A request to move `amount` minor units between two accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_distinct_accounts"))]
pub struct TransferCommand {
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    #[validate(custom(function = "shared::validation::validate_amount"))]
    pub amount: i64,
}

fn validate_distinct_accounts(command: &TransferCommand) -> Result<(), ValidationError> {
    if command.from_account_id == command.to_account_id {
        let mut err = ValidationError::new("same_account");
        err.message = Some("Source and destination accounts must differ".into());
        return Err(err);
    }
    Ok(())
}

/// Rule violations detected before any I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransferRuleError {
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Source and destination accounts must differ")]
    SameAccount,
}

impl TransferCommand {
    pub fn new(from_account_id: Uuid, to_account_id: Uuid, amount: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }

    /// Checks the command's own invariants.
    pub fn check(&self) -> Result<(), TransferRuleError> {
        if self.amount <= 0 {
            return Err(TransferRuleError::InvalidAmount);
        }
        if self.from_account_id == self.to_account_id {
            return Err(TransferRuleError::SameAccount);
        }
        Ok(())
    }

    /// Both account ids in ascending order, the order rows are locked in.
    pub fn lock_order(&self) -> [Uuid; 2] {
        let mut ids = [self.from_account_id, self.to_account_id];
        ids.sort();
        ids
    }
}

/// How the transfer's transaction is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStrategy {
    /// Begin, commit and rollback are called explicitly on a transaction handle.
    ExplicitHandle,
    /// A helper owns the transaction and commits on `Ok`, rolls back on `Err`.
    Managed,
}

impl TransferStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStrategy::ExplicitHandle => "explicit_handle",
            TransferStrategy::Managed => "managed",
        }
    }
}

impl FromStr for TransferStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "explicit_handle" | "query-runner" => Ok(TransferStrategy::ExplicitHandle),
            "managed" | "manager" => Ok(TransferStrategy::Managed),
            _ => Err(format!("Invalid transfer strategy: {}", s)),
        }
    }
}

impl fmt::Display for TransferStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Balances after a committed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    pub amount: i64,
    pub from_balance: i64,
    pub to_balance: i64,
}
