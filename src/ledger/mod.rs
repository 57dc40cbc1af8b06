//! Durable logs: the transfer WAL, its startup recovery, and the
//! transaction history audit trail.

pub mod history;
pub mod recovery;
pub mod transfer_log;

pub use history::TransactionHistory;
pub use recovery::{RecoveryError, RecoveryReport, RecoveryScanner};
pub use transfer_log::{TransferLedger, TransferLogEntry, TransferStatus};
