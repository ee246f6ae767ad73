//! Authenticated account extractor.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use domain::models::AccountProjection;

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::user_auth::bearer_token;

/// The account named by the request's bearer token.
///
/// Reuses the account stored by `require_user_auth` when the route is behind
/// it, otherwise verifies the token itself.
#[derive(Debug, Clone)]
pub struct CurrentAccount(pub AccountProjection);

#[async_trait]
impl FromRequestParts<AppState> for CurrentAccount {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(current) = parts.extensions.get::<CurrentAccount>() {
            return Ok(current.clone());
        }

        let token = bearer_token(&parts.headers).ok_or_else(ApiError::invalid_credentials)?;
        let account = state.authenticator.authorize(token).await?;
        Ok(CurrentAccount(account))
    }
}
