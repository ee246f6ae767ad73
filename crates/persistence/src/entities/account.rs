//! Account entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row mapping for the accounts table.
#[derive(Debug, Clone, FromRow)]
pub struct AccountEntity {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password_hash: Option<String>,
    pub password_cipher: Option<String>,
    pub balance: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<AccountEntity> for domain::models::Account {
    fn from(entity: AccountEntity) -> Self {
        Self {
            id: entity.id,
            username: entity.username,
            email: entity.email,
            phone: entity.phone,
            password_hash: entity.password_hash,
            password_cipher: entity.password_cipher,
            balance: entity.balance,
            is_active: entity.is_active,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}

impl From<AccountEntity> for domain::models::AccountProjection {
    fn from(entity: AccountEntity) -> Self {
        domain::models::Account::from(entity).into()
    }
}
