//! Money Arithmetic
//!
//! Balances and amounts are stored as `f64` (the record layout), but every
//! balance change goes through `Decimal` and is rounded to whole cents, so
//! repeated deposits never drift off the cent grid. All balance arithmetic
//! MUST go through this module.
//!
//! ## Design Principles
//! 1. Whole cents: every value leaving this module has at most 2 decimals
//! 2. Explicit errors: no silent overflow, no NaN balances
//! 3. Client input is parsed exactly, never via `f64`

use rust_decimal::prelude::*;

use crate::error::{BankError, BankResult};

/// Decimal places of every stored amount
pub const CENT_DECIMALS: u32 = 2;

/// Smallest accepted amount (0.01)
pub const MIN_AMOUNT: Decimal = Decimal::from_parts(1, 0, 0, false, CENT_DECIMALS);

fn invalid(msg: impl Into<String>) -> BankError {
    BankError::InvalidInput(msg.into())
}

// ============================================================================
// Conversion
// ============================================================================

/// Stored `f64` to a cent-rounded `Decimal`
pub fn to_cents(value: f64) -> BankResult<Decimal> {
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(CENT_DECIMALS, RoundingStrategy::MidpointAwayFromZero))
        .ok_or_else(|| invalid(format!("amount {} is not a finite number", value)))
}

/// Cent `Decimal` back to the stored representation
pub fn to_stored(value: Decimal) -> BankResult<f64> {
    value
        .to_f64()
        .ok_or_else(|| BankError::Conflict(format!("amount {} does not fit a stored balance", value)))
}

/// A strictly positive amount, at least one cent after rounding
pub fn amount(value: f64) -> BankResult<Decimal> {
    let cents = to_cents(value)?;
    if cents < MIN_AMOUNT {
        return Err(invalid(format!("amount must be at least 0.01, got {}", value)));
    }
    Ok(cents)
}

/// Parse a client amount: plain decimal digits, at most two decimals, ≥ 0.01
///
/// Exponents, signs and separators are rejected.
pub fn parse_amount(raw: &str) -> BankResult<f64> {
    let plain = !raw.is_empty()
        && raw.chars().all(|c| c.is_ascii_digit() || c == '.')
        && raw.matches('.').count() <= 1;
    if !plain {
        return Err(invalid(format!("invalid amount '{}'", raw)));
    }

    let value =
        Decimal::from_str_exact(raw).map_err(|_| invalid(format!("invalid amount '{}'", raw)))?;
    if value.scale() > CENT_DECIMALS {
        return Err(invalid("amount has more than two decimal places"));
    }
    if value < MIN_AMOUNT {
        return Err(invalid("amount must be at least 0.01"));
    }
    to_stored(value)
}

// ============================================================================
// Balance arithmetic
// ============================================================================

/// `balance + amount`, in cents
pub fn credit(balance: f64, amount: f64) -> BankResult<f64> {
    let sum = to_cents(balance)?
        .checked_add(to_cents(amount)?)
        .ok_or_else(|| BankError::Conflict("balance overflow".into()))?;
    to_stored(sum)
}

/// `balance - amount`, in cents; `InsufficientFunds` when it would go negative
pub fn debit(balance: f64, amount: f64) -> BankResult<f64> {
    let balance = to_cents(balance)?;
    let amount = to_cents(amount)?;
    if amount > balance {
        return Err(BankError::InsufficientFunds);
    }
    to_stored(balance - amount)
}

/// Whether `balance` covers `amount`, compared in cents
pub fn covers(balance: f64, amount: f64) -> BankResult<bool> {
    Ok(to_cents(balance)? >= to_cents(amount)?)
}
