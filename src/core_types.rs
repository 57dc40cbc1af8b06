//! Core types used throughout the system
//!
//! Identifier aliases shared by every table. On disk all table ids are
//! 32-bit (the record layout is a cross-process contract), transfer ids are
//! 64-bit.

use crate::error::{BankError, BankResult};

/// User ID - primary key of the user table, assigned sequentially from 1.
pub type UserId = i32;

/// Account ID - always equal to the owning customer's `UserId`.
pub type AccountId = i32;

/// Loan ID
pub type LoanId = i32;

/// Feedback ID
pub type FeedbackId = i32;

/// Transaction-history entry ID
pub type TransactionId = i32;

/// Transfer ID - monotonic, global, correlates WAL entries of one transfer.
pub type TransferId = i64;

/// Zero-based position of a record within its store file.
///
/// Stable for the record's lifetime; doubles as the lock-ordering key.
pub type RecordIndex = u64;

/// Narrow an allocated sequence value to a 32-bit table id.
pub fn narrow_id(id: i64, table: &str) -> BankResult<i32> {
    i32::try_from(id).map_err(|_| BankError::Conflict(format!("{} id space exhausted", table)))
}
