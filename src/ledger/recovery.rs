//! Transfer Recovery
//!
//! Runs once at startup, before any connection is accepted. Every START with
//! no resolving entry (COMMIT, ABORTED, RECOVERED) is an interrupted transfer.
//! The account stamps and the DEBITED marker tell how far it got:
//!
//! 1. receiver `credit_stamp == id`: the credit landed, only the COMMIT was
//!    lost. Close it, no balance change.
//! 2. sender gone: cannot be resolved; left pending for a later run.
//! 3. sender `refund_stamp == id`: an earlier run already refunded. Close it.
//! 4. DEBITED seen or sender `debit_stamp == id`: refund the sender.
//! 5. otherwise nothing moved. Close it.
//!
//! Each resolution appends RECOVERED, so a second run finds nothing to do.

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use thiserror::Error;

use crate::core_types::TransferId;
use crate::error::BankError;
use crate::models::{Account, ROLLBACK_TAG, TransactionKind};
use crate::money;
use crate::storage::RecordStore;

use super::history::TransactionHistory;
use super::transfer_log::{TransferLedger, TransferLogEntry, TransferStatus};

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("recovery I/O: {0}")]
    Io(#[from] BankError),

    #[error("more than {limit} unresolved transfers in the WAL")]
    TooManyPending { limit: usize },
}

/// What a recovery run found and did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// WAL entries scanned
    pub entries: u64,
    pub committed: u64,
    /// Senders refunded (now or by an earlier run)
    pub rolled_back: u64,
    /// Credits that landed without their COMMIT
    pub rolled_forward: u64,
    pub closed_without_debit: u64,
    pub unresolvable: u64,
}

impl RecoveryReport {
    pub fn resolved(&self) -> u64 {
        self.rolled_back + self.rolled_forward + self.closed_without_debit
    }
}

struct Pending {
    start: TransferLogEntry,
    debited: bool,
}

pub struct RecoveryScanner<'a> {
    ledger: &'a TransferLedger,
    accounts: &'a RecordStore<Account>,
    history: &'a TransactionHistory,
    max_pending: usize,
}

impl<'a> RecoveryScanner<'a> {
    pub fn new(
        ledger: &'a TransferLedger,
        accounts: &'a RecordStore<Account>,
        history: &'a TransactionHistory,
        max_pending: usize,
    ) -> Self {
        Self {
            ledger,
            accounts,
            history,
            max_pending,
        }
    }

    pub fn run(&self) -> Result<RecoveryReport, RecoveryError> {
        let mut report = RecoveryReport::default();
        let pending = self.scan(&mut report)?;

        if pending.is_empty() {
            tracing::info!(entries = report.entries, "No interrupted transfers");
            return Ok(report);
        }
        tracing::warn!(
            pending = pending.len(),
            "Interrupted transfers found, resolving"
        );

        // Ascending transfer id
        for (_, p) in pending {
            self.resolve(&p, &mut report)?;
        }

        tracing::info!(
            entries = report.entries,
            committed = report.committed,
            rolled_back = report.rolled_back,
            rolled_forward = report.rolled_forward,
            closed_without_debit = report.closed_without_debit,
            unresolvable = report.unresolvable,
            "Recovery complete"
        );
        Ok(report)
    }

    fn scan(
        &self,
        report: &mut RecoveryReport,
    ) -> Result<BTreeMap<TransferId, Pending>, RecoveryError> {
        let mut pending: FxHashMap<TransferId, Pending> = FxHashMap::default();
        let mut overflow = false;

        self.ledger.replay(|entry| {
            report.entries += 1;
            match entry.status {
                TransferStatus::Start => {
                    pending.insert(
                        entry.transfer_id,
                        Pending {
                            start: entry,
                            debited: false,
                        },
                    );
                    if pending.len() > self.max_pending {
                        overflow = true;
                        return Ok(ControlFlow::Break(()));
                    }
                }
                TransferStatus::Debited => match pending.get_mut(&entry.transfer_id) {
                    Some(p) => p.debited = true,
                    None => tracing::warn!(
                        transfer_id = entry.transfer_id,
                        "DEBITED without an open START"
                    ),
                },
                status => {
                    if pending.remove(&entry.transfer_id).is_some()
                        && status == TransferStatus::Commit
                    {
                        report.committed += 1;
                    }
                }
            }
            Ok(ControlFlow::Continue(()))
        })?;

        if overflow {
            return Err(RecoveryError::TooManyPending {
                limit: self.max_pending,
            });
        }
        Ok(pending.into_iter().collect())
    }

    fn resolve(&self, p: &Pending, report: &mut RecoveryReport) -> Result<(), RecoveryError> {
        let start = &p.start;
        let id = start.transfer_id;

        let receiver = self.accounts.find_by_id(start.to_account as i64)?;
        if receiver.is_some_and(|(_, r)| r.credit_stamp == id) {
            self.ledger.mark(start, TransferStatus::Recovered)?;
            report.rolled_forward += 1;
            tracing::info!(transfer_id = id, "Credit had landed; transfer closed");
            return Ok(());
        }

        let Some((index, sender)) = self.accounts.find_by_id(start.from_account as i64)? else {
            report.unresolvable += 1;
            tracing::warn!(
                transfer_id = id,
                from = start.from_account,
                "Sender account missing; transfer left unresolved"
            );
            return Ok(());
        };

        if sender.refund_stamp == id {
            self.ledger.mark(start, TransferStatus::Recovered)?;
            report.rolled_back += 1;
            tracing::info!(transfer_id = id, "Refund already applied; transfer closed");
            return Ok(());
        }

        if p.debited || sender.debit_stamp == id {
            let refunded = self.accounts.update_at(index, |account| {
                account.balance = money::credit(account.balance, start.amount)?;
                account.refund_stamp = id;
                Ok(account.clone())
            })?;
            if let Err(e) =
                self.history
                    .record(&refunded, TransactionKind::Rollback, start.amount, ROLLBACK_TAG)
            {
                tracing::error!(transfer_id = id, error = %e, "Failed to record refund history");
            }
            self.ledger.mark(start, TransferStatus::Recovered)?;
            report.rolled_back += 1;
            tracing::warn!(
                transfer_id = id,
                account_id = start.from_account,
                amount = start.amount,
                new_balance = refunded.balance,
                "Interrupted transfer rolled back"
            );
            return Ok(());
        }

        self.ledger.mark(start, TransferStatus::Recovered)?;
        report.closed_without_debit += 1;
        tracing::info!(transfer_id = id, "Nothing was debited; transfer closed");
        Ok(())
    }
}
