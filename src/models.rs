// models.rs - Canonical table schema
//
// One definition per table, shared by every component. Each record type
// implements `Record`, so its byte layout lives next to its fields.

use std::fmt;

use crate::core_types::{AccountId, FeedbackId, LoanId, TransactionId, UserId};
use crate::error::{BankError, BankResult};
use crate::storage::{FieldReader, FieldWriter, Record};

// ============================================================
// FIELD WIDTHS
// ============================================================

pub const PASSWORD_LEN: usize = 128;
pub const NAME_LEN: usize = 50;
pub const PHONE_LEN: usize = 15;
pub const EMAIL_LEN: usize = 100;
pub const ADDRESS_LEN: usize = 256;
pub const ACCOUNT_NUMBER_LEN: usize = 20;
pub const FEEDBACK_LEN: usize = 256;
pub const COUNTERPARTY_LEN: usize = 20;

/// Counterparty tag on the history entry of a recovery refund
pub const ROLLBACK_TAG: &str = "ROLLBACK_FAIL";
/// Counterparty tag on the history entry of an approved loan
pub const LOAN_CREDIT_TAG: &str = "LOAN_CREDIT";

// ============================================================
// ENUMS
// ============================================================

/// User role, as stored
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Customer = 0,
    Employee = 1,
    Manager = 2,
    Administrator = 3,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "CUSTOMER",
            Role::Employee => "EMPLOYEE",
            Role::Manager => "MANAGER",
            Role::Administrator => "ADMINISTRATOR",
        }
    }
}

impl TryFrom<u8> for Role {
    type Error = BankError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Customer),
            1 => Ok(Self::Employee),
            2 => Ok(Self::Manager),
            3 => Ok(Self::Administrator),
            _ => Err(BankError::InvalidInput(format!("unknown role: {}", value))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role picked at login: 1=Administrator, 2=Manager, 3=Employee, 4=Customer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleChoice {
    Administrator,
    Manager,
    Employee,
    Customer,
}

impl RoleChoice {
    pub fn expected_role(self) -> Role {
        match self {
            RoleChoice::Administrator => Role::Administrator,
            RoleChoice::Manager => Role::Manager,
            RoleChoice::Employee => Role::Employee,
            RoleChoice::Customer => Role::Customer,
        }
    }
}

impl TryFrom<u8> for RoleChoice {
    type Error = BankError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Administrator),
            2 => Ok(Self::Manager),
            3 => Ok(Self::Employee),
            4 => Ok(Self::Customer),
            _ => Err(BankError::InvalidInput(format!(
                "role choice must be 1-4, got {}",
                value
            ))),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanStatus {
    Pending = 0,
    Processing = 1,
    Approved = 2,
    Rejected = 3,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "PENDING",
            LoanStatus::Processing => "PROCESSING",
            LoanStatus::Approved => "APPROVED",
            LoanStatus::Rejected => "REJECTED",
        }
    }

    /// Approved and Rejected are final
    pub fn is_decided(&self) -> bool {
        matches!(self, LoanStatus::Approved | LoanStatus::Rejected)
    }
}

impl TryFrom<u8> for LoanStatus {
    type Error = BankError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Processing),
            2 => Ok(Self::Approved),
            3 => Ok(Self::Rejected),
            _ => Err(BankError::InvalidInput(format!(
                "unknown loan status: {}",
                value
            ))),
        }
    }
}

/// History entry kind
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Deposit = 0,
    Withdrawal = 1,
    TransferOut = 2,
    TransferIn = 3,
    LoanCredit = 4,
    /// Refund of an interrupted transfer, written by recovery
    Rollback = 5,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "DEPOSIT",
            TransactionKind::Withdrawal => "WITHDRAWAL",
            TransactionKind::TransferOut => "TRANSFER_OUT",
            TransactionKind::TransferIn => "TRANSFER_IN",
            TransactionKind::LoanCredit => "LOAN_CREDIT",
            TransactionKind::Rollback => "ROLLBACK",
        }
    }
}

impl TryFrom<u8> for TransactionKind {
    type Error = BankError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Deposit),
            1 => Ok(Self::Withdrawal),
            2 => Ok(Self::TransferOut),
            3 => Ok(Self::TransferIn),
            4 => Ok(Self::LoanCredit),
            5 => Ok(Self::Rollback),
            _ => Err(BankError::InvalidInput(format!(
                "unknown transaction kind: {}",
                value
            ))),
        }
    }
}

fn stored<T: TryFrom<u8, Error = BankError>>(table: &str, raw: u8) -> BankResult<T> {
    T::try_from(raw).map_err(|e| BankError::corrupt(table, e))
}

// ============================================================
// USER
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub user_id: UserId,
    /// argon2 PHC string
    pub password: String,
    pub role: Role,
    pub is_active: bool,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub email: String,
    pub address: String,
}

impl Record for User {
    const TABLE: &'static str = "users";
    const SIZE: usize =
        4 + PASSWORD_LEN + 1 + 1 + NAME_LEN * 2 + PHONE_LEN + EMAIL_LEN + ADDRESS_LEN;

    fn id(&self) -> i64 {
        self.user_id as i64
    }

    fn encode(&self, out: &mut [u8]) -> BankResult<()> {
        let mut w = FieldWriter::new(out);
        w.put_i32(self.user_id);
        w.put_str("password", &self.password, PASSWORD_LEN)?;
        w.put_u8(self.role as u8);
        w.put_bool(self.is_active);
        w.put_str("first name", &self.first_name, NAME_LEN)?;
        w.put_str("last name", &self.last_name, NAME_LEN)?;
        w.put_str("phone", &self.phone, PHONE_LEN)?;
        w.put_str("email", &self.email, EMAIL_LEN)?;
        w.put_str("address", &self.address, ADDRESS_LEN)?;
        Ok(())
    }

    fn decode(buf: &[u8]) -> BankResult<Self> {
        let mut r = FieldReader::new(buf);
        Ok(Self {
            user_id: r.get_i32(),
            password: r.get_str(Self::TABLE, PASSWORD_LEN)?,
            role: stored(Self::TABLE, r.get_u8())?,
            is_active: r.get_bool(),
            first_name: r.get_str(Self::TABLE, NAME_LEN)?,
            last_name: r.get_str(Self::TABLE, NAME_LEN)?,
            phone: r.get_str(Self::TABLE, PHONE_LEN)?,
            email: r.get_str(Self::TABLE, EMAIL_LEN)?,
            address: r.get_str(Self::TABLE, ADDRESS_LEN)?,
        })
    }
}

// ============================================================
// ACCOUNT
// ============================================================

/// Savings account; `account_id` always equals the owner's user id.
///
/// The three stamps record the last transfer that debited, credited and
/// refunded this account. Each is written in the same record write as the
/// balance change it describes; recovery reads them to tell which half of an
/// interrupted transfer reached the disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub account_id: AccountId,
    pub owner_user_id: UserId,
    pub account_number: String,
    pub balance: f64,
    pub is_active: bool,
    pub debit_stamp: i64,
    pub credit_stamp: i64,
    pub refund_stamp: i64,
}

impl Account {
    pub fn new(owner: UserId) -> Self {
        Self {
            account_id: owner,
            owner_user_id: owner,
            account_number: format!("SB-{}", owner),
            balance: 0.0,
            is_active: true,
            debit_stamp: 0,
            credit_stamp: 0,
            refund_stamp: 0,
        }
    }
}

impl Record for Account {
    const TABLE: &'static str = "accounts";
    const SIZE: usize = 4 + 4 + ACCOUNT_NUMBER_LEN + 8 + 1 + 8 * 3;

    fn id(&self) -> i64 {
        self.account_id as i64
    }

    fn encode(&self, out: &mut [u8]) -> BankResult<()> {
        let mut w = FieldWriter::new(out);
        w.put_i32(self.account_id);
        w.put_i32(self.owner_user_id);
        w.put_str("account number", &self.account_number, ACCOUNT_NUMBER_LEN)?;
        w.put_f64(self.balance);
        w.put_bool(self.is_active);
        w.put_i64(self.debit_stamp);
        w.put_i64(self.credit_stamp);
        w.put_i64(self.refund_stamp);
        Ok(())
    }

    fn decode(buf: &[u8]) -> BankResult<Self> {
        let mut r = FieldReader::new(buf);
        Ok(Self {
            account_id: r.get_i32(),
            owner_user_id: r.get_i32(),
            account_number: r.get_str(Self::TABLE, ACCOUNT_NUMBER_LEN)?,
            balance: r.get_f64(),
            is_active: r.get_bool(),
            debit_stamp: r.get_i64(),
            credit_stamp: r.get_i64(),
            refund_stamp: r.get_i64(),
        })
    }
}

// ============================================================
// LOAN
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Loan {
    pub loan_id: LoanId,
    pub user_id: UserId,
    pub account_id_to_deposit: AccountId,
    pub amount: f64,
    pub status: LoanStatus,
    /// 0 = unassigned
    pub assigned_to_employee_id: UserId,
}

impl Record for Loan {
    const TABLE: &'static str = "loans";
    const SIZE: usize = 4 + 4 + 4 + 8 + 1 + 4;

    fn id(&self) -> i64 {
        self.loan_id as i64
    }

    fn encode(&self, out: &mut [u8]) -> BankResult<()> {
        let mut w = FieldWriter::new(out);
        w.put_i32(self.loan_id);
        w.put_i32(self.user_id);
        w.put_i32(self.account_id_to_deposit);
        w.put_f64(self.amount);
        w.put_u8(self.status as u8);
        w.put_i32(self.assigned_to_employee_id);
        Ok(())
    }

    fn decode(buf: &[u8]) -> BankResult<Self> {
        let mut r = FieldReader::new(buf);
        Ok(Self {
            loan_id: r.get_i32(),
            user_id: r.get_i32(),
            account_id_to_deposit: r.get_i32(),
            amount: r.get_f64(),
            status: stored(Self::TABLE, r.get_u8())?,
            assigned_to_employee_id: r.get_i32(),
        })
    }
}

// ============================================================
// FEEDBACK
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Feedback {
    pub feedback_id: FeedbackId,
    pub user_id: UserId,
    pub text: String,
    pub is_reviewed: bool,
}

impl Record for Feedback {
    const TABLE: &'static str = "feedback";
    const SIZE: usize = 4 + 4 + FEEDBACK_LEN + 1;

    fn id(&self) -> i64 {
        self.feedback_id as i64
    }

    fn encode(&self, out: &mut [u8]) -> BankResult<()> {
        let mut w = FieldWriter::new(out);
        w.put_i32(self.feedback_id);
        w.put_i32(self.user_id);
        w.put_str("feedback", &self.text, FEEDBACK_LEN)?;
        w.put_bool(self.is_reviewed);
        Ok(())
    }

    fn decode(buf: &[u8]) -> BankResult<Self> {
        let mut r = FieldReader::new(buf);
        Ok(Self {
            feedback_id: r.get_i32(),
            user_id: r.get_i32(),
            text: r.get_str(Self::TABLE, FEEDBACK_LEN)?,
            is_reviewed: r.get_bool(),
        })
    }
}

// ============================================================
// TRANSACTION HISTORY
// ============================================================

/// Append-only audit entry
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionEntry {
    pub transaction_id: TransactionId,
    pub account_id: AccountId,
    pub user_id: UserId,
    pub kind: TransactionKind,
    pub amount: f64,
    pub new_balance: f64,
    pub counterparty: String,
}

impl Record for TransactionEntry {
    const TABLE: &'static str = "transactions";
    const SIZE: usize = 4 + 4 + 4 + 1 + 8 + 8 + COUNTERPARTY_LEN;

    fn id(&self) -> i64 {
        self.transaction_id as i64
    }

    fn encode(&self, out: &mut [u8]) -> BankResult<()> {
        let mut w = FieldWriter::new(out);
        w.put_i32(self.transaction_id);
        w.put_i32(self.account_id);
        w.put_i32(self.user_id);
        w.put_u8(self.kind as u8);
        w.put_f64(self.amount);
        w.put_f64(self.new_balance);
        w.put_str("counterparty", &self.counterparty, COUNTERPARTY_LEN)?;
        Ok(())
    }

    fn decode(buf: &[u8]) -> BankResult<Self> {
        let mut r = FieldReader::new(buf);
        Ok(Self {
            transaction_id: r.get_i32(),
            account_id: r.get_i32(),
            user_id: r.get_i32(),
            kind: stored(Self::TABLE, r.get_u8())?,
            amount: r.get_f64(),
            new_balance: r.get_f64(),
            counterparty: r.get_str(Self::TABLE, COUNTERPARTY_LEN)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<R: Record + fmt::Debug + PartialEq>(record: &R) {
        let mut buf = vec![0u8; R::SIZE];
        record.encode(&mut buf).unwrap();
        assert_eq!(&R::decode(&buf).unwrap(), record);
    }

    #[test]
    fn test_record_sizes_are_stable() {
        assert_eq!(User::SIZE, 605);
        assert_eq!(Account::SIZE, 61);
        assert_eq!(Loan::SIZE, 25);
        assert_eq!(Feedback::SIZE, 265);
        assert_eq!(TransactionEntry::SIZE, 49);
    }

    #[test]
    fn test_account_layout() {
        let mut account = Account::new(12);
        account.balance = 250.75;
        account.credit_stamp = 9;
        round_trip(&account);

        let mut buf = vec![0u8; Account::SIZE];
        account.encode(&mut buf).unwrap();
        assert_eq!(&buf[0..4], &12i32.to_le_bytes());
        assert_eq!(&buf[8..13], b"SB-12");
        assert_eq!(&buf[28..36], &250.75f64.to_le_bytes());
    }

    #[test]
    fn test_user_with_full_width_fields() {
        let user = User {
            user_id: 3,
            password: "p".repeat(PASSWORD_LEN),
            role: Role::Manager,
            is_active: false,
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            phone: "9".repeat(PHONE_LEN),
            email: "ada@example.com".into(),
            address: "a".repeat(ADDRESS_LEN),
        };
        round_trip(&user);
    }

    #[test]
    fn test_overlong_field_is_invalid_input() {
        let entry = TransactionEntry {
            transaction_id: 1,
            account_id: 1,
            user_id: 1,
            kind: TransactionKind::TransferOut,
            amount: 1.0,
            new_balance: 0.0,
            counterparty: "x".repeat(COUNTERPARTY_LEN + 1),
        };
        let mut buf = vec![0u8; TransactionEntry::SIZE];
        assert!(matches!(
            entry.encode(&mut buf),
            Err(BankError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_unknown_enum_byte_is_corrupt() {
        let loan = Loan {
            loan_id: 1,
            user_id: 2,
            account_id_to_deposit: 2,
            amount: 100.0,
            status: LoanStatus::Pending,
            assigned_to_employee_id: 0,
        };
        let mut buf = vec![0u8; Loan::SIZE];
        loan.encode(&mut buf).unwrap();
        buf[20] = 9;
        let err = Loan::decode(&buf).unwrap_err();
        assert!(matches!(err, BankError::IoFailure(ref m) if m.contains("corrupt loans")));
    }

    #[test]
    fn test_role_choice_mapping() {
        let cases = [
            (1, Role::Administrator),
            (2, Role::Manager),
            (3, Role::Employee),
            (4, Role::Customer),
        ];
        for (raw, role) in cases {
            assert_eq!(RoleChoice::try_from(raw).unwrap().expected_role(), role);
        }
        assert!(RoleChoice::try_from(0).is_err());
        assert!(RoleChoice::try_from(5).is_err());
    }
}
