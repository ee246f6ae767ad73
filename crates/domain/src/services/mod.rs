//! Domain services for Teller.
//!
//! Services contain business logic that operates on domain models.

pub mod authentication;
pub mod credentials;

pub use authentication::{
    AccountDirectory, AuthError, Authenticator, LoginResult, LookupError, LookupOrder,
};
pub use credentials::{CodecError, CredentialCodec, PasswordStorage};
