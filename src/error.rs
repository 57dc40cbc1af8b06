//! Bank Error Types
//!
//! One taxonomy for every core operation. Errors are explicit return values;
//! the protocol layer renders them using [`BankError::code`].

use thiserror::Error;

/// Core error taxonomy
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BankError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("{0} is deactivated")]
    Inactive(String),

    #[error("I/O failure: {0}")]
    IoFailure(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl BankError {
    /// Get the error code for protocol responses
    pub fn code(&self) -> &'static str {
        match self {
            BankError::NotFound(_) => "NOT_FOUND",
            BankError::InvalidInput(_) => "INVALID_INPUT",
            BankError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            BankError::Inactive(_) => "INACTIVE",
            BankError::IoFailure(_) => "IO_FAILURE",
            BankError::Conflict(_) => "CONFLICT",
        }
    }

    /// A record on disk that does not decode
    pub fn corrupt(table: &str, detail: impl std::fmt::Display) -> Self {
        BankError::IoFailure(format!("corrupt {} record: {}", table, detail))
    }
}

impl From<std::io::Error> for BankError {
    fn from(e: std::io::Error) -> Self {
        BankError::IoFailure(e.to_string())
    }
}

pub type BankResult<T> = Result<T, BankError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(BankError::NotFound("user 3".into()).code(), "NOT_FOUND");
        assert_eq!(BankError::InsufficientFunds.code(), "INSUFFICIENT_FUNDS");
        assert_eq!(BankError::Conflict("x".into()).code(), "CONFLICT");
    }

    #[test]
    fn test_display() {
        assert_eq!(
            BankError::NotFound("account 7".into()).to_string(),
            "account 7 not found"
        );
        assert_eq!(
            BankError::Inactive("receiver account".into()).to_string(),
            "receiver account is deactivated"
        );
    }

    #[test]
    fn test_io_error_maps_to_io_failure() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(BankError::from(io), BankError::IoFailure(_)));
    }
}
