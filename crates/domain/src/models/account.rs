//! Account domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// An account record as stored, credential fields included.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(skip_serializing)] // Never serialize credentials to API responses
    pub password_hash: Option<String>,
    #[serde(skip_serializing)]
    pub password_cipher: Option<String>,
    pub balance: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The credential stored for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredCredential<'a> {
    /// One-way Argon2id digest.
    Digest(&'a str),
    /// Legacy reversible RSA-OAEP ciphertext.
    Cipher(&'a str),
}

impl Account {
    /// The credential to verify against. A digest wins over a legacy cipher.
    pub fn credential(&self) -> Option<StoredCredential<'_>> {
        match (&self.password_hash, &self.password_cipher) {
            (Some(hash), _) => Some(StoredCredential::Digest(hash)),
            (None, Some(cipher)) => Some(StoredCredential::Cipher(cipher)),
            (None, None) => None,
        }
    }

    /// Strips credentials for returning to a caller.
    pub fn projection(&self) -> AccountProjection {
        AccountProjection::from(self.clone())
    }
}

/// An account with every credential field removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountProjection {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub balance: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Account> for AccountProjection {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            username: account.username,
            email: account.email,
            phone: account.phone,
            balance: account.balance,
            is_active: account.is_active,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

/// The unique identity fields of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityField {
    Username,
    Email,
    Phone,
}

impl IdentityField {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityField::Username => "username",
            IdentityField::Email => "email",
            IdentityField::Phone => "phone",
        }
    }

    /// Maps a unique-constraint name from the accounts table to its field.
    pub fn from_constraint(constraint: &str) -> Option<Self> {
        if constraint.contains("username") {
            Some(IdentityField::Username)
        } else if constraint.contains("email") {
            Some(IdentityField::Email)
        } else if constraint.contains("phone") {
            Some(IdentityField::Phone)
        } else {
            None
        }
    }
}

impl FromStr for IdentityField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "username" => Ok(IdentityField::Username),
            "email" => Ok(IdentityField::Email),
            "phone" => Ok(IdentityField::Phone),
            _ => Err(format!("Invalid identity field: {}", s)),
        }
    }
}

impl fmt::Display for IdentityField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A new account to be persisted, before its secret is sealed.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    #[validate(custom(function = "shared::validation::validate_username"))]
    pub username: String,

    #[validate(custom(function = "shared::validation::validate_password_strength"))]
    pub password: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(custom(function = "shared::validation::validate_phone"))]
    pub phone: Option<String>,

    #[serde(default)]
    #[validate(custom(function = "shared::validation::validate_balance"))]
    pub balance: i64,
}

impl NewAccount {
    /// Lowercases the email and trims surrounding whitespace from identity fields.
    pub fn normalized(mut self) -> Self {
        self.username = self.username.trim().to_string();
        self.email = self
            .email
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty());
        self.phone = self
            .phone
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        self
    }

    /// The identity values of this record, for duplicate detection.
    pub fn identities(&self) -> Vec<(IdentityField, &str)> {
        let mut out = vec![(IdentityField::Username, self.username.as_str())];
        if let Some(email) = &self.email {
            out.push((IdentityField::Email, email.as_str()));
        }
        if let Some(phone) = &self.phone {
            out.push((IdentityField::Phone, phone.as_str()));
        }
        out
    }
}

/// Self-service registration input. Opening balances are not client-settable
/// here; unknown fields such as `balance` are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterCommand {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl From<RegisterCommand> for NewAccount {
    fn from(command: RegisterCommand) -> Self {
        NewAccount {
            username: command.username,
            password: command.password,
            email: command.email,
            phone: command.phone,
            balance: 0,
        }
    }
}

/// Sealed form of a secret, ready to persist. Exactly one field is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSecret {
    pub password_hash: Option<String>,
    pub password_cipher: Option<String>,
}

/// Login input as decoded by the HTTP layer.
#[derive(Clone, Deserialize, Validate)]
pub struct LoginCommand {
    /// Username, email or phone.
    #[validate(length(min = 1, max = 255, message = "Account is required"))]
    pub account: String,

    /// Plaintext secret, or RSA-OAEP ciphertext when encrypted secrets are enabled.
    #[validate(length(min = 1, message = "Password is required"))]
    #[serde(alias = "secret")]
    pub password: String,
}

impl fmt::Debug for LoginCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCommand")
            .field("account", &self.account)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        let now = Utc::now();
        Account {
            id: Uuid::new_v4(),
            username: "john_doe".to_string(),
            email: Some("john@example.com".to_string()),
            phone: None,
            password_hash: Some("$argon2id$v=19$m=19456,t=2,p=1$abc$def".to_string()),
            password_cipher: None,
            balance: 100,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn new_account() -> NewAccount {
        NewAccount {
            username: "john_doe".to_string(),
            password: "password123".to_string(),
            email: Some("john@example.com".to_string()),
            phone: Some("+8613800138000".to_string()),
            balance: 0,
        }
    }

    #[test]
    fn test_account_serialization_skips_credentials() {
        let mut account = account();
        account.password_cipher = Some("cipher".to_string());

        let json = serde_json::to_value(&account).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("passwordCipher").is_none());
        assert_eq!(json["username"], "john_doe");
        assert_eq!(json["isActive"], true);
    }

    #[test]
    fn test_projection_has_no_credential_fields() {
        let projection = account().projection();
        let json = serde_json::to_value(&projection).unwrap();
        let object = json.as_object().unwrap();

        assert!(!object.keys().any(|k| k.to_lowercase().contains("password")));
        assert_eq!(json["balance"], 100);
    }

    #[test]
    fn test_credential_prefers_digest() {
        let mut account = account();
        account.password_cipher = Some("cipher".to_string());
        assert!(matches!(
            account.credential(),
            Some(StoredCredential::Digest(_))
        ));

        account.password_hash = None;
        assert_eq!(account.credential(), Some(StoredCredential::Cipher("cipher")));

        account.password_cipher = None;
        assert_eq!(account.credential(), None);
    }

    #[test]
    fn test_identity_field_from_constraint() {
        assert_eq!(
            IdentityField::from_constraint("accounts_username_key"),
            Some(IdentityField::Username)
        );
        assert_eq!(
            IdentityField::from_constraint("accounts_email_key"),
            Some(IdentityField::Email)
        );
        assert_eq!(
            IdentityField::from_constraint("accounts_phone_key"),
            Some(IdentityField::Phone)
        );
        assert_eq!(IdentityField::from_constraint("accounts_pkey"), None);
    }

    #[test]
    fn test_identity_field_from_str() {
        assert_eq!(
            IdentityField::from_str("EMAIL").unwrap(),
            IdentityField::Email
        );
        assert!(IdentityField::from_str("nickname").is_err());
    }

    #[test]
    fn test_new_account_validation() {
        assert!(new_account().validate().is_ok());

        let mut invalid = new_account();
        invalid.email = Some("not-an-email".to_string());
        assert!(invalid.validate().is_err());

        let mut invalid = new_account();
        invalid.phone = Some("12".to_string());
        assert!(invalid.validate().is_err());

        let mut invalid = new_account();
        invalid.password = "short".to_string();
        assert!(invalid.validate().is_err());

        let mut invalid = new_account();
        invalid.balance = -5;
        let errors = invalid.validate().unwrap_err();
        assert_eq!(errors.field_errors()["balance"][0].code, "balance_range");

        let mut invalid = new_account();
        invalid.username = "a b".to_string();
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_new_account_normalized() {
        let mut record = new_account();
        record.username = "  john_doe ".to_string();
        record.email = Some(" John@Example.COM ".to_string());
        record.phone = Some("   ".to_string());

        let record = record.normalized();
        assert_eq!(record.username, "john_doe");
        assert_eq!(record.email.as_deref(), Some("john@example.com"));
        assert_eq!(record.phone, None);
    }

    #[test]
    fn test_new_account_identities() {
        let record = new_account();
        let identities = record.identities();
        assert_eq!(identities.len(), 3);
        assert_eq!(identities[0], (IdentityField::Username, "john_doe"));
    }

    #[test]
    fn test_register_command_ignores_balance() {
        let command: RegisterCommand = serde_json::from_str(
            r#"{"username":"john_doe","password":"password123","balance":1000000000}"#,
        )
        .unwrap();
        let record = NewAccount::from(command);
        assert_eq!(record.balance, 0);
        assert_eq!(record.username, "john_doe");
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_login_command_accepts_secret_alias() {
        let command: LoginCommand =
            serde_json::from_str(r#"{"account":"john_doe","secret":"pw"}"#).unwrap();
        assert_eq!(command.password, "pw");
        assert!(!format!("{:?}", command).contains("pw\""));
    }

    #[test]
    fn test_login_command_validation() {
        let command = LoginCommand {
            account: String::new(),
            password: "x".to_string(),
        };
        assert!(command.validate().is_err());
    }
}
