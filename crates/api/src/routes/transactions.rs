//! Transfer and batch account creation routes.

use axum::{extract::State, http::StatusCode, Json};
use domain::models::{AccountProjection, NewAccount, TransferCommand, TransferReceipt, TransferStrategy};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::CurrentAccount;

/// Envelope for successful transaction responses.
#[derive(Debug, Clone, Serialize)]
pub struct SuccessResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> SuccessResponse<T> {
    fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Request body for batch account creation.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub users: Vec<NewAccount>,
}

async fn transfer(
    state: &AppState,
    caller: &CurrentAccount,
    strategy: TransferStrategy,
    command: TransferCommand,
) -> Result<Json<SuccessResponse<TransferReceipt>>, ApiError> {
    command.validate()?;

    tracing::debug!(
        caller = %caller.0.id,
        strategy = %strategy,
        "Transfer requested"
    );
    let receipt = state.transfers.transfer(strategy, command).await?;
    Ok(Json(SuccessResponse::new(receipt)))
}

/// Transfer with an explicitly managed transaction handle.
///
/// POST /api/v1/transactions/transfer/query-runner
pub async fn transfer_explicit(
    State(state): State<AppState>,
    caller: CurrentAccount,
    Json(command): Json<TransferCommand>,
) -> Result<Json<SuccessResponse<TransferReceipt>>, ApiError> {
    transfer(&state, &caller, TransferStrategy::ExplicitHandle, command).await
}

/// Transfer inside a managed transaction callback.
///
/// POST /api/v1/transactions/transfer/manager
pub async fn transfer_managed(
    State(state): State<AppState>,
    caller: CurrentAccount,
    Json(command): Json<TransferCommand>,
) -> Result<Json<SuccessResponse<TransferReceipt>>, ApiError> {
    transfer(&state, &caller, TransferStrategy::Managed, command).await
}

/// Create several accounts in one transaction.
///
/// POST /api/v1/transactions/users/batch
pub async fn create_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<(StatusCode, Json<SuccessResponse<Vec<AccountProjection>>>), ApiError> {
    let created = state.accounts.create_many(request.users).await?;
    Ok((StatusCode::CREATED, Json(SuccessResponse::new(created))))
}
