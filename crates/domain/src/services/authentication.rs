//! Login and token authorization.
//!
//! A login moves through a fixed sequence of states:
//!
//! ```text
//! Received -> AccountLookup -> CredentialCheck -> TokenIssue -> Complete
//!                   |                  |
//!                   +----> Rejected <--+
//! ```
//!
//! Every rejection surfaces as [`AuthError::InvalidCredentials`], whatever the
//! cause, so callers cannot tell an unknown account from a wrong secret.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::jwt::{IssuedToken, TokenError, TokenService};
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::models::{Account, AccountProjection, IdentityField, LoginCommand};
use crate::services::credentials::{CodecError, CredentialCodec};

/// Error raised by an [`AccountDirectory`] backend.
#[derive(Debug, Error)]
#[error("Account lookup failed: {0}")]
pub struct LookupError(pub String);

/// Keyed account lookups needed by authentication.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Finds an account whose `field` equals `value`.
    async fn find_by_identifier(
        &self,
        field: IdentityField,
        value: &str,
    ) -> Result<Option<Account>, LookupError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, LookupError>;
}

/// The order in which identity fields are tried during login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LookupOrder(Vec<IdentityField>);

impl Default for LookupOrder {
    fn default() -> Self {
        Self(vec![
            IdentityField::Username,
            IdentityField::Email,
            IdentityField::Phone,
        ])
    }
}

impl LookupOrder {
    /// Builds an order, rejecting an empty list or repeated fields.
    pub fn new(fields: Vec<IdentityField>) -> Result<Self, String> {
        if fields.is_empty() {
            return Err("Lookup order must name at least one field".to_string());
        }
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].contains(field) {
                return Err(format!("Lookup order repeats field '{}'", field));
            }
        }
        Ok(Self(fields))
    }

    pub fn fields(&self) -> &[IdentityField] {
        &self.0
    }
}

/// Error type for authentication.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid account or password")]
    InvalidCredentials,

    #[error("Token has expired")]
    ExpiredToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<LookupError> for AuthError {
    fn from(err: LookupError) -> Self {
        AuthError::Persistence(err.0)
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::ExpiredToken => AuthError::ExpiredToken,
            TokenError::InvalidToken => AuthError::InvalidToken,
            TokenError::EncodingError(e) | TokenError::InvalidKey(e) => AuthError::Internal(e),
        }
    }
}

/// A successful login.
#[derive(Debug, Clone)]
pub struct LoginResult {
    pub token: IssuedToken,
    pub account: AccountProjection,
}

/// States of a login attempt.
enum LoginState {
    Received(LoginCommand),
    AccountLookup { identifier: String, secret: String },
    CredentialCheck { account: Option<Account>, secret: String },
    TokenIssue { account: Account },
    Complete(LoginResult),
    Rejected(AuthError),
}

impl LoginState {
    fn name(&self) -> &'static str {
        match self {
            LoginState::Received(_) => "received",
            LoginState::AccountLookup { .. } => "account_lookup",
            LoginState::CredentialCheck { .. } => "credential_check",
            LoginState::TokenIssue { .. } => "token_issue",
            LoginState::Complete(_) => "complete",
            LoginState::Rejected(_) => "rejected",
        }
    }
}

impl fmt::Debug for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runs logins and authorizes bearer tokens.
#[derive(Clone)]
pub struct Authenticator {
    directory: Arc<dyn AccountDirectory>,
    codec: CredentialCodec,
    tokens: TokenService,
    lookup_order: LookupOrder,
    encrypted_secrets: bool,
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("lookup_order", &self.lookup_order)
            .field("encrypted_secrets", &self.encrypted_secrets)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    pub fn new(
        directory: Arc<dyn AccountDirectory>,
        codec: CredentialCodec,
        tokens: TokenService,
        lookup_order: LookupOrder,
    ) -> Self {
        Self {
            directory,
            codec,
            tokens,
            lookup_order,
            encrypted_secrets: false,
        }
    }

    /// Expects login secrets to arrive RSA-OAEP encrypted.
    pub fn with_encrypted_secrets(mut self, enabled: bool) -> Self {
        self.encrypted_secrets = enabled;
        self
    }

    pub fn codec(&self) -> &CredentialCodec {
        &self.codec
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Verifies an account's secret and issues a token for it.
    pub async fn login(&self, command: LoginCommand) -> Result<LoginResult, AuthError> {
        let mut state = LoginState::Received(command);

        let outcome = loop {
            debug!(state = state.name(), "Login state");
            state = match state {
                LoginState::Complete(result) => break Ok(result),
                LoginState::Rejected(err) => break Err(err),
                other => self.advance(other).await,
            };
        };

        match &outcome {
            Ok(result) => {
                metrics::counter!("auth_login_total", "outcome" => "success").increment(1);
                info!(account_id = %result.account.id, jti = %result.token.jti, "Login succeeded");
            }
            Err(AuthError::InvalidCredentials) => {
                metrics::counter!("auth_login_total", "outcome" => "rejected").increment(1);
                info!("Login rejected");
            }
            Err(e) => {
                metrics::counter!("auth_login_total", "outcome" => "error").increment(1);
                error!(error = %e, "Login failed");
            }
        }

        outcome
    }

    async fn advance(&self, state: LoginState) -> LoginState {
        match state {
            LoginState::Received(command) => {
                let secret = if self.encrypted_secrets {
                    match self.codec.open_transport_secret(&command.password).await {
                        Ok(secret) => secret,
                        Err(e) => return LoginState::Rejected(internal(e)),
                    }
                } else {
                    command.password
                };
                LoginState::AccountLookup {
                    identifier: command.account.trim().to_string(),
                    secret,
                }
            }
            LoginState::AccountLookup { identifier, secret } => {
                match self.lookup(&identifier).await {
                    // A missing account still goes through a credential check.
                    Ok(account) => LoginState::CredentialCheck { account, secret },
                    Err(e) => LoginState::Rejected(e.into()),
                }
            }
            LoginState::CredentialCheck { account, secret } => {
                match self.check_credential(account.as_ref(), &secret).await {
                    Ok(true) => match account {
                        Some(account) if account.is_active => LoginState::TokenIssue { account },
                        Some(account) => {
                            debug!(account_id = %account.id, "Inactive account");
                            LoginState::Rejected(AuthError::InvalidCredentials)
                        }
                        None => LoginState::Rejected(AuthError::InvalidCredentials),
                    },
                    Ok(false) => LoginState::Rejected(AuthError::InvalidCredentials),
                    Err(e) => LoginState::Rejected(e),
                }
            }
            LoginState::TokenIssue { account } => {
                match self.tokens.issue(account.id, &account.username) {
                    Ok(token) => LoginState::Complete(LoginResult {
                        token,
                        account: account.into(),
                    }),
                    Err(e) => LoginState::Rejected(e.into()),
                }
            }
            terminal @ (LoginState::Complete(_) | LoginState::Rejected(_)) => terminal,
        }
    }

    /// Tries each configured field in turn; the first match wins.
    async fn lookup(&self, identifier: &str) -> Result<Option<Account>, LookupError> {
        if identifier.is_empty() {
            return Ok(None);
        }
        for field in self.lookup_order.fields() {
            if let Some(account) = self.directory.find_by_identifier(*field, identifier).await? {
                debug!(field = %field, account_id = %account.id, "Account matched");
                return Ok(Some(account));
            }
        }
        Ok(None)
    }

    async fn check_credential(
        &self,
        account: Option<&Account>,
        secret: &str,
    ) -> Result<bool, AuthError> {
        let credential = account.and_then(Account::credential);
        let Some(credential) = credential else {
            self.codec.matches_nothing(secret).await.map_err(internal)?;
            return Ok(false);
        };

        match self.codec.matches(secret, credential).await {
            Ok(matched) => Ok(matched),
            Err(CodecError::CorruptCredential) => {
                error!(
                    account_id = ?account.map(|a| a.id),
                    "Stored credential is corrupt"
                );
                Ok(false)
            }
            Err(e) => Err(internal(e)),
        }
    }

    /// Resolves a bearer token to the active account it names.
    pub async fn authorize(&self, token: &str) -> Result<AccountProjection, AuthError> {
        let claims = self.tokens.verify(token)?;
        let account_id = claims.subject_id()?;

        match self.directory.find_by_id(account_id).await? {
            Some(account) if account.is_active => Ok(account.into()),
            Some(_) => {
                debug!(account_id = %account_id, "Token names an inactive account");
                Err(AuthError::InvalidToken)
            }
            None => {
                debug!(account_id = %account_id, "Token names a missing account");
                Err(AuthError::InvalidToken)
            }
        }
    }
}

fn internal(err: CodecError) -> AuthError {
    AuthError::Internal(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared::cipher::SecretCipher;
    use shared::keystore::KeyStore;
    use shared::password::{HashingParams, SecretHasher};
    use std::sync::{Mutex, OnceLock};

    use crate::services::credentials::PasswordStorage;

    const SECRET: &str = "test_secret_key_for_jwt_testing_12345";

    #[derive(Default)]
    struct InMemoryDirectory {
        accounts: Mutex<Vec<Account>>,
        lookups: Mutex<Vec<IdentityField>>,
    }

    impl InMemoryDirectory {
        fn insert(&self, account: Account) {
            self.accounts.lock().unwrap().push(account);
        }

        fn lookups(&self) -> Vec<IdentityField> {
            self.lookups.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AccountDirectory for InMemoryDirectory {
        async fn find_by_identifier(
            &self,
            field: IdentityField,
            value: &str,
        ) -> Result<Option<Account>, LookupError> {
            self.lookups.lock().unwrap().push(field);
            let accounts = self.accounts.lock().unwrap();
            Ok(accounts
                .iter()
                .find(|a| match field {
                    IdentityField::Username => a.username == value,
                    IdentityField::Email => a.email.as_deref() == Some(value),
                    IdentityField::Phone => a.phone.as_deref() == Some(value),
                })
                .cloned())
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, LookupError> {
            let accounts = self.accounts.lock().unwrap();
            Ok(accounts.iter().find(|a| a.id == id).cloned())
        }
    }

    struct FailingDirectory;

    #[async_trait]
    impl AccountDirectory for FailingDirectory {
        async fn find_by_identifier(
            &self,
            _field: IdentityField,
            _value: &str,
        ) -> Result<Option<Account>, LookupError> {
            Err(LookupError("connection refused".to_string()))
        }

        async fn find_by_id(&self, _id: Uuid) -> Result<Option<Account>, LookupError> {
            Err(LookupError("connection refused".to_string()))
        }
    }

    fn key_store() -> Arc<KeyStore> {
        static STORE: OnceLock<Arc<KeyStore>> = OnceLock::new();
        STORE
            .get_or_init(|| Arc::new(KeyStore::ephemeral().unwrap()))
            .clone()
    }

    fn codec(storage: PasswordStorage) -> CredentialCodec {
        let hasher = SecretHasher::new(HashingParams {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap();
        CredentialCodec::new(hasher, SecretCipher::new(key_store()), storage)
    }

    fn tokens() -> TokenService {
        TokenService::from_secret(SECRET, 3600, 0).unwrap()
    }

    fn authenticator(directory: Arc<dyn AccountDirectory>) -> Authenticator {
        Authenticator::new(
            directory,
            codec(PasswordStorage::Hash),
            tokens(),
            LookupOrder::default(),
        )
    }

    async fn account(codec: &CredentialCodec, username: &str, secret: &str) -> Account {
        let sealed = codec.seal(secret).await.unwrap();
        let now = Utc::now();
        Account {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: Some(format!("{}@example.com", username)),
            phone: Some("+8613800138000".to_string()),
            password_hash: sealed.password_hash,
            password_cipher: sealed.password_cipher,
            balance: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn login(account: &str, password: &str) -> LoginCommand {
        LoginCommand {
            account: account.to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn test_login_issues_token_for_subject() {
        let directory = Arc::new(InMemoryDirectory::default());
        let auth = authenticator(directory.clone());
        let alice = account(auth.codec(), "alice", "password123").await;
        let alice_id = alice.id;
        directory.insert(alice);

        let result = auth.login(login("alice", "password123")).await.unwrap();

        assert_eq!(result.account.id, alice_id);
        let claims = auth.tokens().verify(&result.token.token).unwrap();
        assert_eq!(claims.subject_id().unwrap(), alice_id);
        assert_eq!(claims.username, "alice");
    }

    #[tokio::test]
    async fn test_login_by_email_and_phone() {
        let directory = Arc::new(InMemoryDirectory::default());
        let auth = authenticator(directory.clone());
        directory.insert(account(auth.codec(), "bob", "password123").await);

        assert!(auth.login(login("bob@example.com", "password123")).await.is_ok());
        assert!(auth.login(login("+8613800138000", "password123")).await.is_ok());
    }

    #[tokio::test]
    async fn test_lookup_follows_configured_order() {
        let directory = Arc::new(InMemoryDirectory::default());
        let order = LookupOrder::new(vec![IdentityField::Phone, IdentityField::Username]).unwrap();
        let auth = Authenticator::new(
            directory.clone(),
            codec(PasswordStorage::Hash),
            tokens(),
            order,
        );
        directory.insert(account(auth.codec(), "carol", "password123").await);

        auth.login(login("carol", "password123")).await.unwrap();

        assert_eq!(
            directory.lookups(),
            vec![IdentityField::Phone, IdentityField::Username]
        );
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let directory = Arc::new(InMemoryDirectory::default());
        let auth = authenticator(directory.clone());
        let by_username = account(auth.codec(), "dave@example.com", "password123").await;
        let mut by_email = account(auth.codec(), "erin", "password456").await;
        by_email.email = Some("dave@example.com".to_string());
        let expected = by_username.id;
        directory.insert(by_email);
        directory.insert(by_username);

        let result = auth
            .login(login("dave@example.com", "password123"))
            .await
            .unwrap();
        assert_eq!(result.account.id, expected);
    }

    #[tokio::test]
    async fn test_wrong_secret_and_unknown_account_are_indistinguishable() {
        let directory = Arc::new(InMemoryDirectory::default());
        let auth = authenticator(directory.clone());
        directory.insert(account(auth.codec(), "frank", "password123").await);

        let wrong_secret = auth.login(login("frank", "password999")).await.unwrap_err();
        let unknown = auth.login(login("nobody", "password123")).await.unwrap_err();

        assert!(matches!(wrong_secret, AuthError::InvalidCredentials));
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert_eq!(wrong_secret.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn test_missing_credential_is_rejected() {
        let directory = Arc::new(InMemoryDirectory::default());
        let auth = authenticator(directory.clone());
        let mut grace = account(auth.codec(), "grace", "password123").await;
        grace.password_hash = None;
        directory.insert(grace);

        let err = auth.login(login("grace", "password123")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_corrupt_digest_is_rejected() {
        let directory = Arc::new(InMemoryDirectory::default());
        let auth = authenticator(directory.clone());
        let mut heidi = account(auth.codec(), "heidi", "password123").await;
        heidi.password_hash = Some("garbage".to_string());
        directory.insert(heidi);

        let err = auth.login(login("heidi", "password123")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_inactive_account_is_rejected() {
        let directory = Arc::new(InMemoryDirectory::default());
        let auth = authenticator(directory.clone());
        let mut ivan = account(auth.codec(), "ivan", "password123").await;
        ivan.is_active = false;
        directory.insert(ivan);

        let err = auth.login(login("ivan", "password123")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_legacy_cipher_credential() {
        let directory = Arc::new(InMemoryDirectory::default());
        let auth = authenticator(directory.clone());
        let legacy_codec = codec(PasswordStorage::Cipher);
        directory.insert(account(&legacy_codec, "judy", "password123").await);

        assert!(auth.login(login("judy", "password123")).await.is_ok());
        assert!(auth.login(login("judy", "password1234")).await.is_err());
    }

    #[tokio::test]
    async fn test_encrypted_transport_secret() {
        let directory = Arc::new(InMemoryDirectory::default());
        let auth = authenticator(directory.clone()).with_encrypted_secrets(true);
        directory.insert(account(auth.codec(), "mallory", "password123").await);

        let ciphertext = auth.codec().cipher().encrypt("password123").unwrap();
        assert!(auth.login(login("mallory", &ciphertext)).await.is_ok());

        // A plaintext secret is not valid ciphertext and becomes a sentinel.
        let err = auth.login(login("mallory", "password123")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_lookup_failure_is_persistence_error() {
        let auth = authenticator(Arc::new(FailingDirectory));
        let err = auth.login(login("alice", "password123")).await.unwrap_err();
        assert!(matches!(err, AuthError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_authorize_round_trip() {
        let directory = Arc::new(InMemoryDirectory::default());
        let auth = authenticator(directory.clone());
        directory.insert(account(auth.codec(), "niaj", "password123").await);

        let result = auth.login(login("niaj", "password123")).await.unwrap();
        let projection = auth.authorize(&result.token.token).await.unwrap();
        assert_eq!(projection, result.account);
    }

    #[tokio::test]
    async fn test_authorize_rejects_bad_tokens() {
        let directory = Arc::new(InMemoryDirectory::default());
        let auth = authenticator(directory.clone());

        let err = auth.authorize("not.a.token").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));

        // Valid signature, but no such account.
        let issued = auth.tokens().issue(Uuid::new_v4(), "ghost").unwrap();
        let err = auth.authorize(&issued.token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_authorize_rejects_expired_token() {
        let directory = Arc::new(InMemoryDirectory::default());
        let expiring = TokenService::from_secret(SECRET, -10, 0).unwrap();
        let auth = Authenticator::new(
            directory.clone(),
            codec(PasswordStorage::Hash),
            expiring,
            LookupOrder::default(),
        );
        let olivia = account(auth.codec(), "olivia", "password123").await;
        let issued = auth.tokens().issue(olivia.id, "olivia").unwrap();
        directory.insert(olivia);

        let err = auth.authorize(&issued.token).await.unwrap_err();
        assert!(matches!(err, AuthError::ExpiredToken));
    }

    #[test]
    fn test_lookup_order_validation() {
        assert!(LookupOrder::new(vec![]).is_err());
        assert!(LookupOrder::new(vec![IdentityField::Email, IdentityField::Email]).is_err());
        assert_eq!(
            LookupOrder::default().fields(),
            &[
                IdentityField::Username,
                IdentityField::Email,
                IdentityField::Phone
            ]
        );
    }

    #[test]
    fn test_lookup_order_deserializes_from_list() {
        let order: LookupOrder = serde_json::from_str(r#"["email","username"]"#).unwrap();
        assert_eq!(
            order.fields(),
            &[IdentityField::Email, IdentityField::Username]
        );
    }
}
