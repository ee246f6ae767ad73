//! Balance transfers between two accounts.
//!
//! Both strategies run the same step function inside one transaction and
//! differ only in who owns the transaction: the engine itself, with explicit
//! begin/commit/rollback, or the `with_transaction` helper.

use std::time::Duration;

use domain::models::{TransferCommand, TransferReceipt, TransferRuleError, TransferStrategy};
use persistence::repositories::AccountRepository;
use persistence::transaction::{self, with_transaction, TransactionSettings};
use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::middleware::metrics::record_transfer;

/// Postgres `lock_not_available`, raised when `lock_timeout` expires.
const LOCK_NOT_AVAILABLE: &str = "55P03";
/// Postgres `query_canceled`, raised when `statement_timeout` expires.
const QUERY_CANCELED: &str = "57014";

/// Errors that can occur during a transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Source and destination accounts must differ")]
    SameAccount,

    #[error("Account {0} not found")]
    AccountNotFound(Uuid),

    #[error("Insufficient balance: {available} available, {requested} requested")]
    InsufficientBalance { available: i64, requested: i64 },

    #[error("Balance of account {0} would exceed the maximum")]
    BalanceOverflow(Uuid),

    #[error("Transfer timed out")]
    Timeout,

    #[error("Database error: {0}")]
    Persistence(sqlx::Error),
}

impl TransferError {
    fn outcome(&self) -> &'static str {
        match self {
            TransferError::InvalidAmount | TransferError::SameAccount => "invalid",
            TransferError::AccountNotFound(_) => "account_not_found",
            TransferError::InsufficientBalance { .. } => "insufficient_balance",
            TransferError::BalanceOverflow(_) => "balance_overflow",
            TransferError::Timeout => "timeout",
            TransferError::Persistence(_) => "error",
        }
    }
}

impl From<TransferRuleError> for TransferError {
    fn from(err: TransferRuleError) -> Self {
        match err {
            TransferRuleError::InvalidAmount => TransferError::InvalidAmount,
            TransferRuleError::SameAccount => TransferError::SameAccount,
        }
    }
}

impl From<sqlx::Error> for TransferError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if matches!(
                db_err.code().as_deref(),
                Some(LOCK_NOT_AVAILABLE) | Some(QUERY_CANCELED)
            ) {
                return TransferError::Timeout;
            }
        }
        TransferError::Persistence(err)
    }
}

/// Runs transfers with a bounded duration. Failed transfers are never retried.
#[derive(Clone)]
pub struct TransferEngine {
    pool: PgPool,
    settings: TransactionSettings,
    timeout: Duration,
}

impl TransferEngine {
    pub fn new(pool: PgPool, settings: TransactionSettings, timeout: Duration) -> Self {
        Self {
            pool,
            settings,
            timeout,
        }
    }

    /// Moves `command.amount` from one account to another, atomically.
    pub async fn transfer(
        &self,
        strategy: TransferStrategy,
        command: TransferCommand,
    ) -> Result<TransferReceipt, TransferError> {
        let result = self.run(strategy, command).await;

        match &result {
            Ok(receipt) => {
                record_transfer(strategy, "success");
                info!(
                    strategy = %strategy,
                    from = %receipt.from_account_id,
                    to = %receipt.to_account_id,
                    amount = receipt.amount,
                    "Transfer committed"
                );
            }
            Err(e) => {
                record_transfer(strategy, e.outcome());
                match e {
                    TransferError::Persistence(_) => {
                        warn!(strategy = %strategy, error = %e, "Transfer rolled back")
                    }
                    _ => info!(strategy = %strategy, reason = e.outcome(), "Transfer rejected"),
                }
            }
        }

        result
    }

    async fn run(
        &self,
        strategy: TransferStrategy,
        command: TransferCommand,
    ) -> Result<TransferReceipt, TransferError> {
        command.check()?;

        let work = async {
            match strategy {
                TransferStrategy::ExplicitHandle => self.transfer_explicit(command).await,
                TransferStrategy::Managed => self.transfer_managed(command).await,
            }
        };

        // Dropping the timed-out future drops its transaction, which rolls back.
        tokio::time::timeout(self.timeout, work)
            .await
            .map_err(|_| TransferError::Timeout)?
    }

    async fn transfer_explicit(
        &self,
        command: TransferCommand,
    ) -> Result<TransferReceipt, TransferError> {
        let mut tx = transaction::begin(&self.pool, &self.settings).await?;

        match apply_transfer(&mut *tx, command).await {
            Ok(receipt) => {
                tx.commit().await?;
                Ok(receipt)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed, connection will be discarded");
                }
                Err(e)
            }
        }
    }

    async fn transfer_managed(
        &self,
        command: TransferCommand,
    ) -> Result<TransferReceipt, TransferError> {
        with_transaction(&self.pool, &self.settings, move |conn| {
            Box::pin(apply_transfer(conn, command))
        })
        .await
    }
}

/// The transfer itself: lock, check, debit, credit.
async fn apply_transfer(
    conn: &mut PgConnection,
    command: TransferCommand,
) -> Result<TransferReceipt, TransferError> {
    let locked = AccountRepository::lock_for_update(&mut *conn, &command.lock_order()).await?;
    debug!(locked = locked.len(), "Locked transfer accounts");

    let from = locked
        .iter()
        .find(|a| a.id == command.from_account_id)
        .ok_or(TransferError::AccountNotFound(command.from_account_id))?;
    let to = locked
        .iter()
        .find(|a| a.id == command.to_account_id)
        .ok_or(TransferError::AccountNotFound(command.to_account_id))?;

    if from.balance < command.amount {
        return Err(TransferError::InsufficientBalance {
            available: from.balance,
            requested: command.amount,
        });
    }
    if to.balance.checked_add(command.amount).is_none() {
        return Err(TransferError::BalanceOverflow(command.to_account_id));
    }

    let from_balance =
        AccountRepository::adjust_balance(&mut *conn, command.from_account_id, -command.amount)
            .await?;
    let to_balance =
        AccountRepository::adjust_balance(&mut *conn, command.to_account_id, command.amount)
            .await?;

    Ok(TransferReceipt {
        from_account_id: command.from_account_id,
        to_account_id: command.to_account_id,
        amount: command.amount,
        from_balance,
        to_balance,
    })
}
