//! Field validation for user input
//!
//! Text fields are stored in fixed-width slots, so the limit is a byte
//! length, not a character count.

use crate::error::{BankError, BankResult};
use crate::money;

/// Longest accepted plain-text password
pub const MAX_PASSWORD_LEN: usize = 49;

fn invalid(msg: String) -> BankError {
    BankError::InvalidInput(msg)
}

/// Non-blank text of at most `max` bytes
pub fn require_text(field: &str, value: &str, max: usize) -> BankResult<()> {
    if value.trim().is_empty() {
        return Err(invalid(format!("{} must not be empty", field)));
    }
    if value.len() > max {
        return Err(invalid(format!(
            "{} is too long: {} bytes, limit {}",
            field,
            value.len(),
            max
        )));
    }
    Ok(())
}

pub fn validate_email(email: &str, max: usize) -> BankResult<()> {
    require_text("email", email, max)?;
    if !email.contains('@') || !email.contains('.') || email.contains(char::is_whitespace) {
        return Err(invalid(format!("'{}' is not a valid email address", email)));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> BankResult<()> {
    require_text("password", password, MAX_PASSWORD_LEN)
}

/// Finite and at least one cent; returns the amount rounded to cents
pub fn validate_amount(amount: f64) -> BankResult<f64> {
    money::amount(amount).and_then(money::to_stored)
}
