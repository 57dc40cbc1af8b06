//! Bank
//!
//! The handle every connection works through. It owns the data directory
//! lock, the six stores (each with its own lock manager) and the transfer
//! coordinator. All operations are blocking and may be called from any
//! thread; the server runs them on the blocking pool.
//!
//! Cross-table lock order is fixed: users, then loans, then accounts. No
//! operation takes locks of two tables in any other order.

pub mod accounts;
pub mod feedback;
pub mod loans;
pub mod users;
pub mod validation;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::StorageConfig;
use crate::error::BankResult;
use crate::ledger::{RecoveryError, RecoveryReport, RecoveryScanner, TransactionHistory, TransferLedger};
use crate::models::{Account, Feedback, Loan, User};
use crate::storage::data_dir::{
    ACCOUNTS_FILE, FEEDBACK_FILE, LOANS_FILE, TRANSACTIONS_FILE, TRANSFER_WAL_FILE, USERS_FILE,
};
use crate::storage::{DataDir, RecordStore};
use crate::transfer::{TransferCoordinator, TransferReceipt, TransferRequest};

pub use users::{AuthError, NewUser, UserPatch};

pub struct Bank {
    data_dir: DataDir,
    users: RecordStore<User>,
    accounts: Arc<RecordStore<Account>>,
    loans: RecordStore<Loan>,
    feedback: RecordStore<Feedback>,
    history: Arc<TransactionHistory>,
    ledger: Arc<TransferLedger>,
    coordinator: TransferCoordinator,
    /// Serializes operations that claim an email address
    email_claims: Mutex<()>,
}

impl Bank {
    /// Lock the data directory and bind every store to its file
    pub fn open(config: &StorageConfig) -> BankResult<Self> {
        let data_dir = DataDir::open(&config.data_dir)?;
        let sync = config.sync_writes;

        let accounts = Arc::new(RecordStore::open(data_dir.file(ACCOUNTS_FILE), sync));
        let history = Arc::new(TransactionHistory::open(
            data_dir.file(TRANSACTIONS_FILE),
            sync,
        ));
        let ledger = Arc::new(TransferLedger::open(data_dir.file(TRANSFER_WAL_FILE))?);
        let coordinator =
            TransferCoordinator::new(accounts.clone(), ledger.clone(), history.clone());

        tracing::info!(
            data_dir = %data_dir.root().display(),
            sync_writes = sync,
            "Bank storage opened"
        );

        Ok(Self {
            users: RecordStore::open(data_dir.file(USERS_FILE), sync),
            loans: RecordStore::open(data_dir.file(LOANS_FILE), sync),
            feedback: RecordStore::open(data_dir.file(FEEDBACK_FILE), sync),
            data_dir,
            accounts,
            history,
            ledger,
            coordinator,
            email_claims: Mutex::new(()),
        })
    }

    /// Resolve interrupted transfers; run once before serving
    pub fn recover(&self, max_pending: usize) -> Result<RecoveryReport, RecoveryError> {
        RecoveryScanner::new(&self.ledger, &self.accounts, &self.history, max_pending).run()
    }

    pub fn transfer(&self, request: &TransferRequest) -> BankResult<TransferReceipt> {
        self.coordinator.transfer(request)
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data_dir
    }

    pub fn accounts(&self) -> &RecordStore<Account> {
        &self.accounts
    }

    pub fn ledger(&self) -> &TransferLedger {
        &self.ledger
    }

    pub fn transaction_history(&self) -> &TransactionHistory {
        &self.history
    }

    fn email_claims(&self) -> MutexGuard<'_, ()> {
        self.email_claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use tempfile::TempDir;

    pub fn open_bank() -> (TempDir, Bank) {
        let dir = TempDir::new().unwrap();
        let bank = Bank::open(&StorageConfig {
            data_dir: dir.path().to_path_buf(),
            sync_writes: false,
        })
        .unwrap();
        (dir, bank)
    }
}
