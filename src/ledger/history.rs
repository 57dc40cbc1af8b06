//! Transaction history
//!
//! Append-only audit trail of balance movements, one entry per account side.

use std::path::PathBuf;

use crate::core_types::{AccountId, narrow_id};
use crate::error::BankResult;
use crate::models::{Account, TransactionEntry, TransactionKind};
use crate::storage::{Record, RecordStore};

#[derive(Debug)]
pub struct TransactionHistory {
    store: RecordStore<TransactionEntry>,
}

impl TransactionHistory {
    pub fn open(path: impl Into<PathBuf>, sync_writes: bool) -> Self {
        Self {
            store: RecordStore::open(path, sync_writes),
        }
    }

    /// Append an entry for `account` as it stands after the movement
    pub fn record(
        &self,
        account: &Account,
        kind: TransactionKind,
        amount: f64,
        counterparty: &str,
    ) -> BankResult<TransactionEntry> {
        let (_, entry) = self.store.append_with(|next| {
            Ok(TransactionEntry {
                transaction_id: narrow_id(next, TransactionEntry::TABLE)?,
                account_id: account.account_id,
                user_id: account.owner_user_id,
                kind,
                amount,
                new_balance: account.balance,
                counterparty: counterparty.to_string(),
            })
        })?;
        Ok(entry)
    }

    pub fn for_account(&self, account_id: AccountId) -> BankResult<Vec<TransactionEntry>> {
        Ok(self
            .store
            .scan(|e| e.account_id == account_id)?
            .into_iter()
            .map(|(_, e)| e)
            .collect())
    }
}
