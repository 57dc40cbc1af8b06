//! Single-account operations: balance, deposit, withdraw, history

use crate::core_types::{AccountId, UserId};
use crate::error::{BankError, BankResult};
use crate::models::{Account, Role, TransactionEntry, TransactionKind};

use crate::money;

use super::Bank;
use super::validation::validate_amount;

/// Counterparty shown for deposits and withdrawals
const NO_COUNTERPARTY: &str = "---";

impl Bank {
    pub fn account(&self, account_id: AccountId) -> BankResult<Account> {
        let (index, _) = self.accounts.require_by_id(account_id as i64, "account")?;
        self.accounts.read_at(index)
    }

    pub fn deposit(&self, account_id: AccountId, amount: f64) -> BankResult<Account> {
        let amount = validate_amount(amount)?;
        let updated = self.adjust_balance(account_id, |account| {
            account.balance = money::credit(account.balance, amount)?;
            Ok(())
        })?;
        self.record_transaction(&updated, TransactionKind::Deposit, amount, NO_COUNTERPARTY);
        tracing::info!(account_id, amount, new_balance = updated.balance, "Deposit");
        Ok(updated)
    }

    pub fn withdraw(&self, account_id: AccountId, amount: f64) -> BankResult<Account> {
        let amount = validate_amount(amount)?;
        let updated = self.adjust_balance(account_id, |account| {
            account.balance = money::debit(account.balance, amount)?;
            Ok(())
        })?;
        self.record_transaction(&updated, TransactionKind::Withdrawal, amount, NO_COUNTERPARTY);
        tracing::info!(account_id, amount, new_balance = updated.balance, "Withdrawal");
        Ok(updated)
    }

    /// Open the account of an existing customer who has none
    pub fn open_account(&self, user_id: UserId) -> BankResult<Account> {
        let (_, user) = self.users.require_by_id(user_id as i64, "user")?;
        if user.role != Role::Customer {
            return Err(BankError::InvalidInput(format!(
                "user {} is not a customer",
                user_id
            )));
        }

        let (_, account) = self.accounts.append_checked(
            |existing| {
                if existing.account_id == user_id {
                    return Err(BankError::Conflict(format!(
                        "user {} already has an account",
                        user_id
                    )));
                }
                Ok(())
            },
            |_| Ok(Account::new(user_id)),
        )?;
        tracing::info!(user_id, "Account opened");
        Ok(account)
    }

    pub fn history(&self, account_id: AccountId) -> BankResult<Vec<TransactionEntry>> {
        self.history.for_account(account_id)
    }

    // Read-modify-write of an active account under its record lock
    pub(crate) fn adjust_balance<F>(&self, account_id: AccountId, change: F) -> BankResult<Account>
    where
        F: FnOnce(&mut Account) -> BankResult<()>,
    {
        let (index, _) = self.accounts.require_by_id(account_id as i64, "account")?;
        self.accounts.update_at(index, |account| {
            if !account.is_active {
                return Err(BankError::Inactive("account".into()));
            }
            change(account)?;
            Ok(account.clone())
        })
    }

    /// Append a history entry; failures are logged, not returned
    pub(crate) fn record_transaction(
        &self,
        account: &Account,
        kind: TransactionKind,
        amount: f64,
        counterparty: &str,
    ) {
        if let Err(e) = self.history.record(account, kind, amount, counterparty) {
            tracing::error!(
                account_id = account.account_id,
                kind = kind.as_str(),
                error = %e,
                "Failed to record transaction history"
            );
        }
    }
}
