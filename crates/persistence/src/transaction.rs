//! Transaction helpers.
//!
//! `sqlx::Transaction` rolls back when dropped without a commit, so a
//! transaction abandoned by a cancelled future or an early `?` never leaves
//! partial writes behind and its connection goes back to the pool.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::warn;

use crate::metrics::QueryTimer;

/// Per-transaction Postgres settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionSettings {
    /// Longest wait for a row lock before the statement fails.
    pub lock_timeout: Duration,
    /// Longest any single statement may run.
    pub statement_timeout: Duration,
}

impl Default for TransactionSettings {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(2),
            statement_timeout: Duration::from_secs(5),
        }
    }
}

impl TransactionSettings {
    /// Applies the settings to the current transaction only (`SET LOCAL`).
    pub async fn apply(&self, conn: &mut PgConnection) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            SELECT set_config('lock_timeout', $1, true),
                   set_config('statement_timeout', $2, true)
            "#,
        )
        .bind(format!("{}ms", self.lock_timeout.as_millis()))
        .bind(format!("{}ms", self.statement_timeout.as_millis()))
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

/// Begins a transaction with `settings` applied.
pub async fn begin(
    pool: &PgPool,
    settings: &TransactionSettings,
) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    settings.apply(&mut *tx).await?;
    Ok(tx)
}

/// Future returned by the body of [`with_transaction`].
pub type TxFuture<'c, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>;

/// Runs `body` inside a transaction, committing on `Ok` and rolling back on `Err`.
///
/// ```ignore
/// let moved = with_transaction(&pool, &settings, move |conn| {
///     Box::pin(async move { AccountRepository::adjust_balance(conn, id, -30).await })
/// })
/// .await?;
/// ```
pub async fn with_transaction<T, E, F>(
    pool: &PgPool,
    settings: &TransactionSettings,
    body: F,
) -> Result<T, E>
where
    F: for<'c> FnOnce(&'c mut PgConnection) -> TxFuture<'c, T, E>,
    E: From<sqlx::Error>,
{
    let timer = QueryTimer::new("transaction");
    let mut tx = begin(pool, settings).await?;

    let outcome = body(&mut *tx).await;
    let result = match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback failed, connection will be discarded");
            }
            Err(e)
        }
    };

    timer.record();
    result
}
