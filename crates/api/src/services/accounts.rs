//! Account registration, single and batched.
//!
//! A batch is validated as a whole before anything touches the database, then
//! written in one transaction. Either every record is created or none is.

use std::collections::HashMap;

use domain::models::{AccountProjection, IdentityField, NewAccount};
use domain::services::{CodecError, CredentialCodec};
use persistence::repositories::{AccountInsert, AccountRepository};
use persistence::transaction::TransactionSettings;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{info, warn};
use validator::Validate;

use crate::error::{flatten_validation_errors, ValidationDetail};
use crate::middleware::metrics::record_accounts_created;

/// Postgres `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

/// Errors that can occur while creating accounts.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Invalid account data")]
    Invalid(Vec<ValidationDetail>),

    #[error("Batch must contain at least one record")]
    EmptyBatch,

    #[error("Batch of {size} records exceeds the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("{}", duplicate_message(.0))]
    DuplicateIdentity(Option<IdentityField>),

    #[error("Failed to seal secret: {0}")]
    Codec(#[from] CodecError),

    #[error("Database error: {0}")]
    Persistence(sqlx::Error),
}

fn duplicate_message(field: &Option<IdentityField>) -> String {
    match field {
        Some(field) => format!("An account with this {} already exists", field),
        None => "An account with this identity already exists".to_string(),
    }
}

impl From<sqlx::Error> for AccountError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
                let field = db_err.constraint().and_then(IdentityField::from_constraint);
                return AccountError::DuplicateIdentity(field);
            }
        }
        AccountError::Persistence(err)
    }
}

/// Creates accounts.
#[derive(Clone)]
pub struct AccountService {
    repo: AccountRepository,
    codec: CredentialCodec,
    settings: TransactionSettings,
    max_batch_size: usize,
}

impl AccountService {
    pub fn new(
        repo: AccountRepository,
        codec: CredentialCodec,
        settings: TransactionSettings,
        max_batch_size: usize,
    ) -> Self {
        Self {
            repo,
            codec,
            settings,
            max_batch_size,
        }
    }

    /// Registers one account.
    pub async fn register(&self, record: NewAccount) -> Result<AccountProjection, AccountError> {
        let record = record.normalized();
        record
            .validate()
            .map_err(|e| AccountError::Invalid(flatten_validation_errors(&e, None)))?;

        let secret = self.codec.seal(&record.password).await?;
        let entity = self.repo.create(&AccountInsert::new(record, secret)).await?;

        record_accounts_created(1);
        info!(account_id = %entity.id, "Account registered");
        Ok(entity.into())
    }

    /// Creates every record in one transaction, or none of them.
    pub async fn create_many(
        &self,
        records: Vec<NewAccount>,
    ) -> Result<Vec<AccountProjection>, AccountError> {
        if records.is_empty() {
            return Err(AccountError::EmptyBatch);
        }
        if records.len() > self.max_batch_size {
            return Err(AccountError::BatchTooLarge {
                size: records.len(),
                max: self.max_batch_size,
            });
        }

        let records: Vec<NewAccount> = records.into_iter().map(NewAccount::normalized).collect();
        let problems = validate_batch(&records);
        if !problems.is_empty() {
            return Err(AccountError::Invalid(problems));
        }

        let inserts = self.seal_all(records).await?;
        let count = inserts.len();

        let created = match self.repo.create_many(inserts, &self.settings).await {
            Ok(created) => created,
            Err(e) => {
                let err = AccountError::from(e);
                warn!(records = count, error = %err, "Batch creation rolled back");
                return Err(err);
            }
        };

        record_accounts_created(count);
        info!(records = count, "Batch of accounts created");
        Ok(created.into_iter().map(Into::into).collect())
    }

    /// Seals every secret on the blocking pool, keeping record order.
    async fn seal_all(&self, records: Vec<NewAccount>) -> Result<Vec<AccountInsert>, AccountError> {
        let mut tasks = JoinSet::new();
        for (index, record) in records.into_iter().enumerate() {
            let codec = self.codec.clone();
            tasks.spawn(async move {
                let secret = codec.seal(&record.password).await?;
                Ok::<_, CodecError>((index, AccountInsert::new(record, secret)))
            });
        }

        let mut sealed = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            let (index, insert) = joined.map_err(CodecError::from)??;
            sealed.push((index, insert));
        }
        sealed.sort_by_key(|(index, _)| *index);

        Ok(sealed.into_iter().map(|(_, insert)| insert).collect())
    }
}

/// Validates every record and checks the batch for repeated identities.
///
/// Errors carry the index of the record they belong to.
pub fn validate_batch(records: &[NewAccount]) -> Vec<ValidationDetail> {
    let mut problems = Vec::new();
    let mut seen: HashMap<(IdentityField, String), usize> = HashMap::new();

    for (index, record) in records.iter().enumerate() {
        if let Err(errors) = record.validate() {
            problems.extend(flatten_validation_errors(&errors, Some(index)));
        }

        for (field, value) in record.identities() {
            let key = (field, value.to_lowercase());
            match seen.get(&key) {
                Some(first) => problems.push(ValidationDetail {
                    index: Some(index),
                    field: field.to_string(),
                    message: format!("Duplicate {} within batch (also record {})", field, first),
                }),
                None => {
                    seen.insert(key, index);
                }
            }
        }
    }

    problems
}
