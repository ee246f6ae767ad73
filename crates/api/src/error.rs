use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::services::AuthError;
use serde::Serialize;
use thiserror::Error;

use crate::services::accounts::AccountError;
use crate::services::transfer::TransferError;

/// Message returned for every credential or token failure.
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid account or password";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("Balance overflow: {0}")]
    BalanceOverflow(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Duplicate identity: {0}")]
    DuplicateIdentity(String),

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        details: Vec<ValidationDetail>,
    },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<ValidationDetail>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationDetail {
    /// Position in a batch, for per-record errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    pub field: String,
    pub message: String,
}

impl ApiError {
    /// A validation error with a single message and no field details.
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation {
            message: message.into(),
            details: Vec::new(),
        }
    }

    /// The generic 401 used for every credential and token failure.
    pub fn invalid_credentials() -> Self {
        ApiError::Unauthorized(INVALID_CREDENTIALS_MESSAGE.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut details = None;
        let (status, error_code, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::AccountNotFound(msg) => (StatusCode::NOT_FOUND, "account_not_found", msg),
            ApiError::InsufficientBalance(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "insufficient_balance",
                msg,
            ),
            ApiError::BalanceOverflow(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "balance_overflow", msg)
            }
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::DuplicateIdentity(msg) => (StatusCode::CONFLICT, "duplicate_identity", msg),
            ApiError::Validation {
                message,
                details: field_details,
            } => {
                if !field_details.is_empty() {
                    details = Some(field_details);
                }
                (StatusCode::BAD_REQUEST, "validation_error", message)
            }
            ApiError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "timeout", msg),
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".into(),
                )
            }
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
        };

        let body = ErrorBody {
            error: error_code.into(),
            message,
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".into()),
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some("23505") => ApiError::Conflict("Resource already exists".into()),
                _ => ApiError::Internal(format!("Database error: {}", db_err)),
            },
            sqlx::Error::PoolTimedOut => {
                ApiError::ServiceUnavailable("Database is busy, try again later".into())
            }
            _ => ApiError::Internal(format!("Database error: {}", err)),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let details = flatten_validation_errors(&errors, None);
        let message = if details.len() == 1 {
            details[0].message.clone()
        } else {
            format!("{} validation errors", details.len())
        };

        ApiError::Validation { message, details }
    }
}

/// Flattens validator errors into one detail per failed rule.
///
/// Struct-level errors are reported under the field `_schema`.
pub fn flatten_validation_errors(
    errors: &validator::ValidationErrors,
    index: Option<usize>,
) -> Vec<ValidationDetail> {
    let mut details: Vec<ValidationDetail> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errors)| {
            let name = field.to_string();
            let name = if name == "__all__" {
                "_schema".to_string()
            } else {
                name
            };
            errors.iter().map(move |e| ValidationDetail {
                index,
                field: name.clone(),
                message: e
                    .message
                    .clone()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string()),
            })
        })
        .collect();
    // HashMap iteration order is unstable; keep responses deterministic.
    details.sort_by(|a, b| a.field.cmp(&b.field).then(a.message.cmp(&b.message)));
    details
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials | AuthError::ExpiredToken | AuthError::InvalidToken => {
                ApiError::invalid_credentials()
            }
            AuthError::Persistence(msg) => ApiError::Internal(format!("Account lookup failed: {}", msg)),
            AuthError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<TransferError> for ApiError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::InvalidAmount | TransferError::SameAccount => {
                ApiError::validation(err.to_string())
            }
            TransferError::AccountNotFound(_) => ApiError::AccountNotFound(err.to_string()),
            TransferError::InsufficientBalance { .. } => {
                ApiError::InsufficientBalance(err.to_string())
            }
            TransferError::BalanceOverflow(_) => ApiError::BalanceOverflow(err.to_string()),
            TransferError::Timeout => ApiError::Timeout(err.to_string()),
            TransferError::Persistence(e) => ApiError::Internal(format!("Transfer failed: {}", e)),
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::Invalid(details) => {
                let message = if details.len() == 1 {
                    details[0].message.clone()
                } else {
                    format!("{} validation errors", details.len())
                };
                ApiError::Validation { message, details }
            }
            AccountError::EmptyBatch | AccountError::BatchTooLarge { .. } => {
                ApiError::validation(err.to_string())
            }
            AccountError::DuplicateIdentity(_) => ApiError::DuplicateIdentity(err.to_string()),
            AccountError::Codec(e) => ApiError::Internal(format!("Failed to seal secret: {}", e)),
            AccountError::Persistence(e) => ApiError::Internal(format!("Database error: {}", e)),
        }
    }
}
