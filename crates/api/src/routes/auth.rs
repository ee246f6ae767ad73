//! Authentication routes: login, registration, profile and the public key.

use axum::{extract::State, http::StatusCode, Json};
use domain::models::{AccountProjection, LoginCommand, RegisterCommand};
use serde::Serialize;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::CurrentAccount;

/// Response body for a successful login.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub account: AccountProjection,
}

/// Response body for a successful registration.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterResponse {
    pub account: AccountProjection,
}

/// Public half of the secret-encryption key pair.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyResponse {
    pub public_key: String,
    pub fingerprint: String,
}

/// Exchange an account identifier and secret for a bearer token.
///
/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(command): Json<LoginCommand>,
) -> Result<Json<LoginResponse>, ApiError> {
    command.validate()?;

    let result = state.authenticator.login(command).await?;

    Ok(Json(LoginResponse {
        access_token: result.token.token,
        token_type: "Bearer".to_string(),
        expires_in: result.token.expires_in,
        account: result.account,
    }))
}

/// Register a new account.
///
/// POST /api/v1/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(command): Json<RegisterCommand>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let account = state.accounts.register(command.into()).await?;
    Ok((StatusCode::CREATED, Json(RegisterResponse { account })))
}

/// The account named by the bearer token.
///
/// GET /api/v1/auth/profile
pub async fn profile(CurrentAccount(account): CurrentAccount) -> Json<AccountProjection> {
    Json(account)
}

/// PEM public key clients use to encrypt secrets in transit.
///
/// GET /api/v1/auth/public-key
pub async fn public_key(State(state): State<AppState>) -> Json<PublicKeyResponse> {
    let keys = state.keys.current();
    Json(PublicKeyResponse {
        public_key: keys.public_pem().to_string(),
        fingerprint: keys.fingerprint().to_string(),
    })
}
