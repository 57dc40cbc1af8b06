//! Vaultline - multi-user banking server
//!
//! Users, accounts, loans, feedback and transaction history live in
//! fixed-size record files guarded by an in-process record lock manager.
//! Transfers between accounts go through a write-ahead log that startup
//! recovery replays.
//!
//! # Modules
//!
//! - [`storage`] - Record codec, lock manager, record stores
//! - [`models`] - On-disk record types and their enums
//! - [`money`] - Cent-exact balance arithmetic
//! - [`ledger`] - Transfer WAL, recovery scanner, transaction history
//! - [`transfer`] - Transfer coordinator and its state machine
//! - [`bank`] - Every business operation, on one shared handle
//! - [`session`] - One live login per user
//! - [`server`] - TCP line protocol

// Core types - must be first!
pub mod core_types;
pub mod error;

pub mod config;
pub mod logging;

pub mod bank;
pub mod ledger;
pub mod models;
pub mod money;
pub mod server;
pub mod session;
pub mod storage;
pub mod transfer;

// Convenient re-exports at crate root
pub use bank::{AuthError, Bank, NewUser, UserPatch};
pub use core_types::{AccountId, FeedbackId, LoanId, TransactionId, TransferId, UserId};
pub use error::{BankError, BankResult};
pub use models::{
    Account, Feedback, Loan, LoanStatus, Role, RoleChoice, TransactionEntry, TransactionKind, User,
};
pub use session::{SessionError, SessionGuard, SessionRegistry};
pub use transfer::{TransferReceipt, TransferRequest};
