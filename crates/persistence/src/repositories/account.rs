//! Account repository for database operations.
//!
//! Reads that stand alone go through the pool. Writes that belong to a larger
//! unit of work take a `&mut PgConnection`, so they run the same on a bare
//! connection or inside a transaction.

use async_trait::async_trait;
use domain::models::{Account, IdentityField, NewAccount, SealedSecret};
use domain::services::{AccountDirectory, LookupError};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::entities::AccountEntity;
use crate::metrics::QueryTimer;
use crate::transaction::{with_transaction, TransactionSettings};

const ACCOUNT_COLUMNS: &str = "id, username, email, phone, password_hash, password_cipher, \
                               balance, is_active, created_at, updated_at";

/// A validated record paired with its sealed secret, ready to insert.
#[derive(Debug, Clone)]
pub struct AccountInsert {
    pub username: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub secret: SealedSecret,
    pub balance: i64,
}

impl AccountInsert {
    pub fn new(record: NewAccount, secret: SealedSecret) -> Self {
        Self {
            username: record.username,
            email: record.email,
            phone: record.phone,
            secret,
            balance: record.balance,
        }
    }
}

/// Repository for account-related database operations.
#[derive(Clone)]
pub struct AccountRepository {
    pool: PgPool,
}

impl AccountRepository {
    /// Creates a new AccountRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Find an account by ID.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<AccountEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_account_by_id");
        let result = sqlx::query_as::<_, AccountEntity>(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Find an account by one of its unique identity fields.
    ///
    /// Emails are stored lowercased, so the lookup value is lowercased too.
    pub async fn find_by_identity(
        &self,
        field: IdentityField,
        value: &str,
    ) -> Result<Option<AccountEntity>, sqlx::Error> {
        let (query_name, column, value) = match field {
            IdentityField::Username => ("find_account_by_username", "username", value.to_string()),
            IdentityField::Email => ("find_account_by_email", "email", value.to_lowercase()),
            IdentityField::Phone => ("find_account_by_phone", "phone", value.to_string()),
        };

        let timer = QueryTimer::new(query_name);
        let result = sqlx::query_as::<_, AccountEntity>(&format!(
            "SELECT {} FROM accounts WHERE {} = $1",
            ACCOUNT_COLUMNS, column
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Create a single account.
    pub async fn create(&self, account: &AccountInsert) -> Result<AccountEntity, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        Self::insert(&mut *conn, account).await
    }

    /// Create all accounts in one transaction, or none of them.
    pub async fn create_many(
        &self,
        accounts: Vec<AccountInsert>,
        settings: &TransactionSettings,
    ) -> Result<Vec<AccountEntity>, sqlx::Error> {
        let timer = QueryTimer::new("create_accounts_batch");
        let result = with_transaction(&self.pool, settings, move |conn| {
            Box::pin(async move {
                let mut created = Vec::with_capacity(accounts.len());
                for account in &accounts {
                    created.push(Self::insert(&mut *conn, account).await?);
                }
                Ok(created)
            })
        })
        .await;
        timer.record();
        result
    }

    /// Insert one account on the given connection.
    pub async fn insert(
        conn: &mut PgConnection,
        account: &AccountInsert,
    ) -> Result<AccountEntity, sqlx::Error> {
        let timer = QueryTimer::new("insert_account");
        let result = sqlx::query_as::<_, AccountEntity>(&format!(
            r#"
            INSERT INTO accounts (username, email, phone, password_hash, password_cipher, balance)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(&account.username)
        .bind(&account.email)
        .bind(&account.phone)
        .bind(&account.secret.password_hash)
        .bind(&account.secret.password_cipher)
        .bind(account.balance)
        .fetch_one(&mut *conn)
        .await;
        timer.record();
        result
    }

    /// Lock the given accounts for update, in ascending id order.
    ///
    /// Rows that do not exist are simply absent from the result.
    pub async fn lock_for_update(
        conn: &mut PgConnection,
        ids: &[Uuid],
    ) -> Result<Vec<AccountEntity>, sqlx::Error> {
        let timer = QueryTimer::new("lock_accounts_for_update");
        let result = sqlx::query_as::<_, AccountEntity>(&format!(
            r#"
            SELECT {}
            FROM accounts
            WHERE id = ANY($1)
            ORDER BY id
            FOR UPDATE
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&mut *conn)
        .await;
        timer.record();
        result
    }

    /// Add `delta` to an account's balance, returning the new balance.
    pub async fn adjust_balance(
        conn: &mut PgConnection,
        id: Uuid,
        delta: i64,
    ) -> Result<i64, sqlx::Error> {
        let timer = QueryTimer::new("adjust_account_balance");
        let result = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE accounts
            SET balance = balance + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING balance
            "#,
        )
        .bind(id)
        .bind(delta)
        .fetch_one(&mut *conn)
        .await;
        timer.record();
        result
    }

    /// Read a balance without locking.
    pub async fn balance(&self, id: Uuid) -> Result<Option<i64>, sqlx::Error> {
        let timer = QueryTimer::new("find_account_balance");
        let result = sqlx::query_scalar::<_, i64>("SELECT balance FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await;
        timer.record();
        result
    }
}

#[async_trait]
impl AccountDirectory for AccountRepository {
    async fn find_by_identifier(
        &self,
        field: IdentityField,
        value: &str,
    ) -> Result<Option<Account>, LookupError> {
        self.find_by_identity(field, value)
            .await
            .map(|entity| entity.map(Account::from))
            .map_err(|e| LookupError(e.to_string()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, LookupError> {
        AccountRepository::find_by_id(self, id)
            .await
            .map(|entity| entity.map(Account::from))
            .map_err(|e| LookupError(e.to_string()))
    }
}
