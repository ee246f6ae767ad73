//! Common validation utilities for account identity fields and secrets.
//!
//! Each validator returns a `validator::ValidationError` so it can be used
//! both through `#[validate(custom(function = ...))]` and directly.

use validator::ValidationError;

lazy_static::lazy_static! {
    static ref USERNAME_REGEX: regex::Regex =
        regex::Regex::new(r"^[A-Za-z0-9_.\-]{3,50}$").unwrap();
    /// E.164-style phone number with optional leading `+`.
    static ref PHONE_REGEX: regex::Regex =
        regex::Regex::new(r"^\+?[1-9][0-9]{6,14}$").unwrap();
}

/// Minimum password length in characters.
pub const MIN_PASSWORD_LEN: usize = 8;
/// Maximum password length in characters.
pub const MAX_PASSWORD_LEN: usize = 128;

fn error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

/// Usernames are 3-50 characters of letters, digits, `_`, `.` or `-`.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if USERNAME_REGEX.is_match(username) {
        Ok(())
    } else {
        Err(error(
            "username_format",
            "Username must be 3-50 characters of letters, digits, '_', '.' or '-'",
        ))
    }
}

/// Validates an E.164-style phone number.
pub fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    if PHONE_REGEX.is_match(phone) {
        Ok(())
    } else {
        Err(error("phone_format", "Invalid phone number format"))
    }
}

/// Password rules:
/// - 8 to 128 characters
/// - at least one letter and one digit
/// - no control characters
pub fn validate_password_strength(password: &str) -> Result<(), ValidationError> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err(error(
            "password_too_short",
            "Password must be at least 8 characters",
        ));
    }
    if len > MAX_PASSWORD_LEN {
        return Err(error(
            "password_too_long",
            "Password must be at most 128 characters",
        ));
    }
    if password.chars().any(char::is_control) {
        return Err(error(
            "password_control_chars",
            "Password must not contain control characters",
        ));
    }
    if !password.chars().any(char::is_alphabetic) {
        return Err(error(
            "password_no_letter",
            "Password must contain at least one letter",
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(error(
            "password_no_digit",
            "Password must contain at least one digit",
        ));
    }
    Ok(())
}

/// Transfer amounts are strictly positive minor units.
pub fn validate_amount(amount: i64) -> Result<(), ValidationError> {
    if amount > 0 {
        Ok(())
    } else {
        Err(error("amount_range", "Amount must be greater than zero"))
    }
}

/// Opening balances cannot be negative.
pub fn validate_balance(balance: i64) -> Result<(), ValidationError> {
    if balance >= 0 {
        Ok(())
    } else {
        Err(error("balance_range", "Balance must not be negative"))
    }
}
