//! Bearer token authentication middleware.
//!
//! Verifies the token, loads the account it names and stores the account
//! projection in request extensions for handlers.

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::CurrentAccount;

/// Returns the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Middleware that requires a valid bearer token for an active account.
///
/// Every failure answers with the same 401 body.
pub async fn require_user_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(req.headers()) else {
        tracing::debug!("Missing or malformed Authorization header");
        return ApiError::invalid_credentials().into_response();
    };

    match state.authenticator.authorize(token).await {
        Ok(account) => {
            req.extensions_mut().insert(CurrentAccount(account));
            next.run(req).await
        }
        Err(e) => {
            tracing::debug!(error = %e, "Token rejected");
            ApiError::from(e).into_response()
        }
    }
}
