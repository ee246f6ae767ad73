use domain::services::{LookupOrder, PasswordStorage};
use persistence::transaction::TransactionSettings;
use serde::Deserialize;
use shared::jwt::{TokenError, TokenService};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    /// Identity token signing configuration
    pub jwt: JwtAuthConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub crypto: CryptoConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl From<&DatabaseConfig> for persistence::db::DatabaseConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            url: config.url.clone(),
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            connect_timeout_secs: config.connect_timeout_secs,
            idle_timeout_secs: config.idle_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `json` or `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtAuthConfig {
    /// Shared HS256 secret. Ignored when a PEM key pair is configured.
    #[serde(default)]
    pub secret: String,

    /// RSA private key in PEM format; enables RS256 together with `public_key`
    #[serde(default)]
    pub private_key: String,

    /// RSA public key in PEM format
    #[serde(default)]
    pub public_key: String,

    /// Token lifetime in seconds (default: 3600 = 1 hour)
    #[serde(default = "default_token_expiry")]
    pub expiry_secs: i64,

    /// Clock skew tolerance in seconds
    #[serde(default)]
    pub leeway_secs: u64,
}

impl JwtAuthConfig {
    fn uses_rsa(&self) -> bool {
        !self.private_key.is_empty() && !self.public_key.is_empty()
    }

    /// Builds the signer this configuration describes.
    pub fn token_service(&self) -> Result<TokenService, TokenError> {
        if self.uses_rsa() {
            TokenService::from_rsa_pem(
                &self.private_key,
                &self.public_key,
                self.expiry_secs,
                self.leeway_secs,
            )
        } else {
            TokenService::from_secret(&self.secret, self.expiry_secs, self.leeway_secs)
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Identity fields tried at login, in order
    #[serde(default)]
    pub lookup_order: LookupOrder,

    /// `hash` (default) or `cipher` (legacy, reversible)
    #[serde(default)]
    pub password_storage: PasswordStorage,

    /// Whether login secrets arrive RSA-OAEP encrypted
    #[serde(default)]
    pub encrypted_secrets: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CryptoConfig {
    /// Directory holding `private.pem` and `public.pem`
    #[serde(default = "default_key_dir")]
    pub key_dir: String,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            key_dir: default_key_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    /// Upper bound on a whole transfer, lock waits included
    #[serde(default = "default_transfer_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_transfer_timeout_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
            statement_timeout_ms: default_statement_timeout_ms(),
        }
    }
}

impl TransferConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn transaction_settings(&self) -> TransactionSettings {
        TransactionSettings {
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            statement_timeout: Duration::from_millis(self.statement_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    5
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_token_expiry() -> i64 {
    3600 // 1 hour
}
fn default_key_dir() -> String {
    "keys".to_string()
}
fn default_transfer_timeout_ms() -> u64 {
    10_000
}
fn default_lock_timeout_ms() -> u64 {
    2_000
}
fn default_statement_timeout_ms() -> u64 {
    5_000
}
fn default_max_batch_size() -> usize {
    100
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with TELLER__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("TELLER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("auth.lookup_order")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides.
    ///
    /// Builds from embedded defaults so tests do not depend on config files.
    #[cfg(test)]
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [server]
            host = "0.0.0.0"
            port = 8080
            request_timeout_secs = 30

            [database]
            url = ""
            max_connections = 20
            min_connections = 5
            connect_timeout_secs = 10
            idle_timeout_secs = 600

            [logging]
            level = "info"
            format = "json"

            [jwt]
            secret = "test-secret"
            expiry_secs = 3600
            leeway_secs = 0

            [auth]
            lookup_order = ["username", "email", "phone"]
            password_storage = "hash"
            encrypted_secrets = false

            [crypto]
            key_dir = "keys"

            [transfer]
            timeout_ms = 10000
            lock_timeout_ms = 2000
            statement_timeout_ms = 5000

            [limits]
            max_batch_size = 100
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        // Validation is left to the caller so tests can load partial configs.
        builder.build()?.try_deserialize()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "TELLER__DATABASE__URL environment variable must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        if !self.jwt.uses_rsa() && self.jwt.secret.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "TELLER__JWT__SECRET or a jwt private/public key pair must be set".to_string(),
            ));
        }

        if self.jwt.expiry_secs <= 0 {
            return Err(ConfigValidationError::InvalidValue(
                "jwt.expiry_secs must be positive".to_string(),
            ));
        }

        LookupOrder::new(self.auth.lookup_order.fields().to_vec())
            .map_err(ConfigValidationError::InvalidValue)?;

        if self.transfer.timeout_ms == 0 || self.transfer.lock_timeout_ms == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "transfer timeouts must be positive".to_string(),
            ));
        }

        if self.limits.max_batch_size == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "limits.max_batch_size must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}
