//! Loan applications and their processing

use crate::core_types::{LoanId, UserId, narrow_id};
use crate::error::{BankError, BankResult};
use crate::money;
use crate::models::{LOAN_CREDIT_TAG, Loan, LoanStatus, Role, TransactionKind};
use crate::storage::{LockMode, Record};

use super::Bank;
use super::validation::validate_amount;

impl Bank {
    /// File a loan application against the user's own account
    pub fn apply_loan(&self, user_id: UserId, amount: f64) -> BankResult<Loan> {
        let amount = validate_amount(amount)?;
        let (_, account) = self.accounts.require_by_id(user_id as i64, "account")?;
        if !account.is_active {
            return Err(BankError::Inactive("account".into()));
        }

        let (_, loan) = self.loans.append_with(|next| {
            Ok(Loan {
                loan_id: narrow_id(next, Loan::TABLE)?,
                user_id,
                account_id_to_deposit: account.account_id,
                amount,
                status: LoanStatus::Pending,
                assigned_to_employee_id: 0,
            })
        })?;
        tracing::info!(loan_id = loan.loan_id, user_id, amount, "Loan applied");
        Ok(loan)
    }

    pub fn loans_for_user(&self, user_id: UserId) -> BankResult<Vec<Loan>> {
        self.list_loans(|l| l.user_id == user_id)
    }

    pub fn unassigned_loans(&self) -> BankResult<Vec<Loan>> {
        self.list_loans(|l| l.assigned_to_employee_id == 0 && l.status == LoanStatus::Pending)
    }

    pub fn assigned_loans(&self, employee_id: UserId) -> BankResult<Vec<Loan>> {
        self.list_loans(|l| l.assigned_to_employee_id == employee_id)
    }

    fn list_loans(&self, pred: impl FnMut(&Loan) -> bool) -> BankResult<Vec<Loan>> {
        Ok(self.loans.scan(pred)?.into_iter().map(|(_, l)| l).collect())
    }

    /// Hand a pending, unassigned loan to an employee
    pub fn assign_loan(&self, loan_id: LoanId, employee_id: UserId) -> BankResult<Loan> {
        let (_, employee) = self.users.require_by_id(employee_id as i64, "employee")?;
        if employee.role != Role::Employee {
            return Err(BankError::InvalidInput(format!(
                "user {} is not an employee",
                employee_id
            )));
        }
        if !employee.is_active {
            return Err(BankError::Inactive("employee".into()));
        }

        let (index, _) = self.loans.require_by_id(loan_id as i64, "loan")?;
        let loan = self.loans.update_at(index, |loan| {
            if loan.assigned_to_employee_id != 0 || loan.status != LoanStatus::Pending {
                return Err(BankError::Conflict(format!(
                    "loan {} is already assigned or processed",
                    loan_id
                )));
            }
            loan.assigned_to_employee_id = employee_id;
            loan.status = LoanStatus::Processing;
            Ok(loan.clone())
        })?;
        tracing::info!(loan_id, employee_id, "Loan assigned");
        Ok(loan)
    }

    /// Approve or reject a loan assigned to `employee_id`
    ///
    /// The decision is written before the account is credited, all under
    /// the loan's record lock. A failed credit puts the loan back to
    /// `Processing`, so a loan is credited at most once.
    pub fn process_loan(
        &self,
        loan_id: LoanId,
        employee_id: UserId,
        approve: bool,
    ) -> BankResult<Loan> {
        let (index, _) = self.loans.require_by_id(loan_id as i64, "loan")?;
        let guard = self.loans.lock_record(index, LockMode::Exclusive);
        let mut loan = self.loans.read_locked(&guard)?;

        if loan.assigned_to_employee_id != employee_id {
            return Err(BankError::Conflict(format!(
                "loan {} is not assigned to you",
                loan_id
            )));
        }
        if loan.status.is_decided() {
            return Err(BankError::Conflict(format!(
                "loan {} has already been processed",
                loan_id
            )));
        }

        let undecided = loan.status;
        loan.status = if approve {
            LoanStatus::Approved
        } else {
            LoanStatus::Rejected
        };
        if let Err(e) = self.loans.write_locked(&guard, &loan) {
            tracing::error!(loan_id, error = %e, "Loan status write failed");
            return Err(e);
        }

        let credited = if approve {
            let credit = self.adjust_balance(loan.account_id_to_deposit, |account| {
                account.balance = money::credit(account.balance, loan.amount)?;
                Ok(())
            });
            match credit {
                Ok(account) => Some(account),
                Err(e) => {
                    loan.status = undecided;
                    if let Err(restore) = self.loans.write_locked(&guard, &loan) {
                        tracing::error!(loan_id, error = %restore, "Loan status restore failed");
                    }
                    tracing::error!(loan_id, error = %e, "Loan credit failed");
                    return Err(e);
                }
            }
        } else {
            None
        };
        drop(guard);

        if let Some(account) = credited {
            self.record_transaction(&account, TransactionKind::LoanCredit, loan.amount, LOAN_CREDIT_TAG);
        }
        tracing::info!(loan_id, employee_id, status = loan.status.as_str(), "Loan processed");
        Ok(loan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::NewUser;
    use crate::bank::tests_support::open_bank;

    fn person(role: Role, email: &str) -> NewUser {
        NewUser {
            role,
            password: "pw1234".into(),
            first_name: "F".into(),
            last_name: "L".into(),
            phone: "1234567890".into(),
            email: email.into(),
            address: "Somewhere".into(),
        }
    }

    // ============================================================
    // TDD Test 1: apply -> assign -> approve credits the account
    // ============================================================
    #[test]
    fn test_loan_approval_credits_account() {
        let (_dir, bank) = open_bank();
        let cust = bank.create_user(person(Role::Customer, "c@x.com")).unwrap().user_id;
        let emp = bank.create_user(person(Role::Employee, "e@x.com")).unwrap().user_id;

        let loan = bank.apply_loan(cust, 2500.0).unwrap();
        assert_eq!(loan.status, LoanStatus::Pending);
        assert_eq!(bank.unassigned_loans().unwrap().len(), 1);

        bank.assign_loan(loan.loan_id, emp).unwrap();
        assert!(bank.unassigned_loans().unwrap().is_empty());
        assert_eq!(bank.assigned_loans(emp).unwrap().len(), 1);

        let done = bank.process_loan(loan.loan_id, emp, true).unwrap();
        assert_eq!(done.status, LoanStatus::Approved);
        assert_eq!(bank.account(cust).unwrap().balance, 2500.0);

        let history = bank.history(cust).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, TransactionKind::LoanCredit);
        assert_eq!(history[0].counterparty, LOAN_CREDIT_TAG);

        // Never credited twice
        assert!(matches!(
            bank.process_loan(loan.loan_id, emp, true),
            Err(BankError::Conflict(_))
        ));
        assert_eq!(bank.account(cust).unwrap().balance, 2500.0);
    }

    #[test]
    fn test_rejection_and_assignment_rules() {
        let (_dir, bank) = open_bank();
        let cust = bank.create_user(person(Role::Customer, "c@x.com")).unwrap().user_id;
        let emp = bank.create_user(person(Role::Employee, "e@x.com")).unwrap().user_id;
        let mgr = bank.create_user(person(Role::Manager, "m@x.com")).unwrap().user_id;

        let loan = bank.apply_loan(cust, 100.0).unwrap();
        assert!(matches!(
            bank.assign_loan(loan.loan_id, mgr),
            Err(BankError::InvalidInput(_))
        ));
        // Not assigned to this employee yet
        assert!(matches!(
            bank.process_loan(loan.loan_id, emp, false),
            Err(BankError::Conflict(_))
        ));

        bank.assign_loan(loan.loan_id, emp).unwrap();
        assert!(matches!(
            bank.assign_loan(loan.loan_id, emp),
            Err(BankError::Conflict(_))
        ));

        let rejected = bank.process_loan(loan.loan_id, emp, false).unwrap();
        assert_eq!(rejected.status, LoanStatus::Rejected);
        assert_eq!(bank.account(cust).unwrap().balance, 0.0);
        assert_eq!(bank.loans_for_user(cust).unwrap()[0].status, LoanStatus::Rejected);
    }

    #[test]
    fn test_apply_requires_account() {
        let (_dir, bank) = open_bank();
        let emp = bank.create_user(person(Role::Employee, "e@x.com")).unwrap().user_id;
        assert!(matches!(
            bank.apply_loan(emp, 10.0),
            Err(BankError::NotFound(_))
        ));
        assert!(matches!(
            bank.apply_loan(emp, 0.0),
            Err(BankError::InvalidInput(_))
        ));
    }

    fn assigned_loan(bank: &Bank, amount: f64) -> (UserId, UserId, Loan) {
        let cust = bank.create_user(person(Role::Customer, "c@x.com")).unwrap().user_id;
        let emp = bank.create_user(person(Role::Employee, "e@x.com")).unwrap().user_id;
        let loan = bank.apply_loan(cust, amount).unwrap();
        bank.assign_loan(loan.loan_id, emp).unwrap();
        (cust, emp, loan)
    }

    // ============================================================
    // TDD Test 2: A failed status write credits nothing
    // ============================================================
    #[test]
    fn test_status_write_failure_leaves_balance() {
        let (_dir, bank) = open_bank();
        let (cust, emp, loan) = assigned_loan(&bank, 300.0);

        bank.loans.fail_next_write_at(0);
        assert!(matches!(
            bank.process_loan(loan.loan_id, emp, true),
            Err(BankError::IoFailure(_))
        ));
        assert_eq!(bank.account(cust).unwrap().balance, 0.0);
        assert_eq!(bank.loans_for_user(cust).unwrap()[0].status, LoanStatus::Processing);
        assert!(bank.loans.locks().is_idle());

        // Retry credits exactly once
        bank.process_loan(loan.loan_id, emp, true).unwrap();
        assert_eq!(bank.account(cust).unwrap().balance, 300.0);
        assert!(bank.process_loan(loan.loan_id, emp, true).is_err());
        assert_eq!(bank.account(cust).unwrap().balance, 300.0);
        assert_eq!(bank.history(cust).unwrap().len(), 1);
    }

    // ============================================================
    // TDD Test 3: A failed credit puts the loan back to Processing
    // ============================================================
    #[test]
    fn test_credit_failure_restores_loan() {
        let (_dir, bank) = open_bank();
        let (cust, emp, loan) = assigned_loan(&bank, 300.0);
        bank.set_user_active(cust, false, true).unwrap();

        assert!(matches!(
            bank.process_loan(loan.loan_id, emp, true),
            Err(BankError::Inactive(_))
        ));
        assert_eq!(bank.loans_for_user(cust).unwrap()[0].status, LoanStatus::Processing);
        assert_eq!(bank.account(cust).unwrap().balance, 0.0);
        assert!(bank.history(cust).unwrap().is_empty());

        bank.set_user_active(cust, true, true).unwrap();
        let done = bank.process_loan(loan.loan_id, emp, true).unwrap();
        assert_eq!(done.status, LoanStatus::Approved);
        assert_eq!(bank.account(cust).unwrap().balance, 300.0);
    }
}
