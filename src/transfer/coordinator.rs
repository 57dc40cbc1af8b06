//! Transfer Coordinator
//!
//! Moves funds between two accounts. The WAL START is durable before any
//! balance is touched, both account records are locked in ascending index
//! order, and each balance write carries its transfer stamp so recovery can
//! tell which half reached the disk.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::core_types::{AccountId, TransferId};
use crate::error::{BankError, BankResult};
use crate::ledger::{TransactionHistory, TransferLedger, TransferLogEntry, TransferStatus};
use crate::models::{Account, TransactionKind};
use crate::money;
use crate::storage::{LockMode, RecordStore};

use super::state::TransferState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferRequest {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferReceipt {
    pub transfer_id: TransferId,
    pub from_balance: f64,
    pub to_balance: f64,
}

/// State tracker for one transfer
struct Progress {
    transfer_id: TransferId,
    state: TransferState,
}

impl Progress {
    fn advance(&mut self, next: TransferState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!(
            transfer_id = self.transfer_id,
            from = %self.state,
            to = %next,
            "Transfer state"
        );
        self.state = next;
    }
}

/// Transfer Coordinator - the only multi-record write path
pub struct TransferCoordinator {
    accounts: Arc<RecordStore<Account>>,
    ledger: Arc<TransferLedger>,
    history: Arc<TransactionHistory>,
}

impl TransferCoordinator {
    pub fn new(
        accounts: Arc<RecordStore<Account>>,
        ledger: Arc<TransferLedger>,
        history: Arc<TransactionHistory>,
    ) -> Self {
        Self {
            accounts,
            ledger,
            history,
        }
    }

    /// Execute one transfer
    ///
    /// Errors before the debit leave no balance change. An `IoFailure` after
    /// a successful debit leaves the sender debited with no COMMIT; startup
    /// recovery refunds it.
    pub fn transfer(&self, req: &TransferRequest) -> BankResult<TransferReceipt> {
        // Step 1: pre-checks (may be stale; repeated under lock)
        let amount = money::amount(req.amount).and_then(money::to_stored)?;
        if req.from == req.to {
            return Err(BankError::InvalidInput(
                "cannot transfer to the same account".into(),
            ));
        }
        let (from_index, sender) = self
            .accounts
            .require_by_id(req.from as i64, "sender account")?;
        let (to_index, receiver) = self
            .accounts
            .require_by_id(req.to as i64, "receiver account")?;
        check_transfer(&sender, &receiver, amount)?;

        // Step 2: durable intent
        let start = self.ledger.begin(req.from, req.to, amount)?;
        let mut progress = Progress {
            transfer_id: start.transfer_id,
            state: TransferState::Validated,
        };
        progress.advance(TransferState::Logged);

        // Step 3: ascending index order
        let guards = self
            .accounts
            .lock_records_ordered(&[from_index, to_index], LockMode::Exclusive)
            .inspect_err(|_| self.abort(&start))?;
        let (from_guard, to_guard) = if from_index < to_index {
            (&guards[0], &guards[1])
        } else {
            (&guards[1], &guards[0])
        };
        progress.advance(TransferState::Locked);

        // Step 4: re-read and re-validate under lock
        let locked = self
            .accounts
            .read_locked(from_guard)
            .and_then(|s| Ok((s, self.accounts.read_locked(to_guard)?)))
            .and_then(|(s, r)| {
                check_transfer(&s, &r, amount)?;
                let debited = money::debit(s.balance, amount)?;
                let credited = money::credit(r.balance, amount)?;
                Ok((s, r, debited, credited))
            });
        let (mut sender, mut receiver, debited, credited) = match locked {
            Ok(pair) => pair,
            Err(e) => {
                drop(guards);
                progress.advance(TransferState::Aborted);
                self.abort(&start);
                return Err(e);
            }
        };

        // Step 5: debit, marker, credit
        sender.balance = debited;
        sender.debit_stamp = start.transfer_id;
        if let Err(e) = self.accounts.write_locked(from_guard, &sender) {
            error!(transfer_id = start.transfer_id, error = %e, "Debit write failed");
            return Err(e);
        }
        progress.advance(TransferState::Debited);

        // The debit stamp still covers a lost marker.
        if let Err(e) = self.ledger.mark(&start, TransferStatus::Debited) {
            error!(transfer_id = start.transfer_id, error = %e, "DEBITED marker append failed");
        }

        receiver.balance = credited;
        receiver.credit_stamp = start.transfer_id;
        if let Err(e) = self.accounts.write_locked(to_guard, &receiver) {
            error!(
                transfer_id = start.transfer_id,
                from = req.from,
                amount,
                error = %e,
                "Credit write failed; sender stays debited until recovery"
            );
            return Err(e);
        }
        progress.advance(TransferState::Credited);

        // Step 6: commit. A lost COMMIT is rolled forward by recovery from the
        // receiver's credit stamp.
        if let Err(e) = self.ledger.mark(&start, TransferStatus::Commit) {
            error!(transfer_id = start.transfer_id, error = %e, "COMMIT append failed");
        }
        progress.advance(TransferState::Committed);
        drop(guards);

        info!(
            transfer_id = start.transfer_id,
            from = req.from,
            to = req.to,
            amount,
            "Transfer committed"
        );

        // Step 7: observational history
        self.record_history(&sender, TransactionKind::TransferOut, amount, &receiver);
        self.record_history(&receiver, TransactionKind::TransferIn, amount, &sender);

        Ok(TransferReceipt {
            transfer_id: start.transfer_id,
            from_balance: sender.balance,
            to_balance: receiver.balance,
        })
    }

    // Close a START whose transfer moved no balance. Recovery closes it too
    // if this append is lost.
    fn abort(&self, start: &TransferLogEntry) {
        if let Err(e) = self.ledger.mark(start, TransferStatus::Aborted) {
            warn!(transfer_id = start.transfer_id, error = %e, "ABORTED append failed");
        }
    }

    fn record_history(
        &self,
        account: &Account,
        kind: TransactionKind,
        amount: f64,
        counterparty: &Account,
    ) {
        if let Err(e) = self
            .history
            .record(account, kind, amount, &counterparty.account_number)
        {
            error!(
                account_id = account.account_id,
                kind = kind.as_str(),
                error = %e,
                "Failed to record transfer history"
            );
        }
    }
}

fn check_transfer(sender: &Account, receiver: &Account, amount: f64) -> BankResult<()> {
    if !sender.is_active {
        return Err(BankError::Inactive("sender account".into()));
    }
    if !receiver.is_active {
        return Err(BankError::Inactive("receiver account".into()));
    }
    if !money::covers(sender.balance, amount)? {
        return Err(BankError::InsufficientFunds);
    }
    Ok(())
}
