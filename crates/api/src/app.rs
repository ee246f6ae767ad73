use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use domain::services::{Authenticator, CredentialCodec, PasswordStorage};
use persistence::repositories::AccountRepository;
use shared::cipher::SecretCipher;
use shared::keystore::KeyStore;
use shared::password::{HashingParams, SecretHasher};
use sqlx::PgPool;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::{metrics_handler, metrics_middleware, require_user_auth, trace_id};
use crate::routes::{auth, health, transactions};
use crate::services::{AccountService, TransferEngine};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub keys: Arc<KeyStore>,
    pub authenticator: Authenticator,
    pub accounts: AccountService,
    pub transfers: TransferEngine,
}

impl AppState {
    /// Builds the state, loading or generating the key pair in `crypto.key_dir`.
    pub async fn from_config(config: Config, pool: PgPool) -> anyhow::Result<Self> {
        let key_dir = config.crypto.key_dir.clone();
        let keys = tokio::task::spawn_blocking(move || KeyStore::load_or_generate(key_dir))
            .await
            .context("Key loading task failed")?
            .context("Failed to load encryption keys")?;

        Self::new(config, pool, Arc::new(keys))
    }

    /// Builds the state around an existing key store.
    pub fn new(config: Config, pool: PgPool, keys: Arc<KeyStore>) -> anyhow::Result<Self> {
        let hasher = SecretHasher::new(HashingParams::default())
            .context("Invalid password hashing parameters")?;
        let cipher = SecretCipher::new(keys.clone());

        if config.auth.password_storage == PasswordStorage::Cipher {
            tracing::warn!(
                "Password storage is set to reversible encryption; \
                 new credentials will not be hashed"
            );
        }
        let codec = CredentialCodec::new(hasher, cipher, config.auth.password_storage);

        let tokens = config
            .jwt
            .token_service()
            .context("Failed to initialize token service")?;

        let repo = AccountRepository::new(pool.clone());
        let authenticator = Authenticator::new(
            Arc::new(repo.clone()),
            codec.clone(),
            tokens,
            config.auth.lookup_order.clone(),
        )
        .with_encrypted_secrets(config.auth.encrypted_secrets);

        let accounts = AccountService::new(
            repo,
            codec,
            config.transfer.transaction_settings(),
            config.limits.max_batch_size,
        );
        let transfers = TransferEngine::new(
            pool.clone(),
            config.transfer.transaction_settings(),
            config.transfer.timeout(),
        );

        Ok(Self {
            pool,
            config: Arc::new(config),
            keys,
            authenticator,
            accounts,
            transfers,
        })
    }
}

pub fn create_app(state: AppState) -> Router {
    let request_timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    // Routes behind a bearer token
    let protected_routes = Router::new()
        .route("/api/v1/auth/profile", get(auth::profile))
        .route(
            "/api/v1/transactions/transfer/query-runner",
            post(transactions::transfer_explicit),
        )
        .route(
            "/api/v1/transactions/transfer/manager",
            post(transactions::transfer_managed),
        )
        .route("/api/v1/transactions/users/batch", post(transactions::create_batch))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_user_auth,
        ));

    let auth_routes = Router::new()
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/auth/register", post(auth::register))
        .route("/api/v1/auth/public-key", get(auth::public_key));

    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(public_routes)
        .merge(auth_routes)
        .merge(protected_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors)
        .with_state(state)
}
