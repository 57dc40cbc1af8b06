//! Line protocol
//!
//! One command per line, whitespace-separated, verb case-insensitive.
//! Replies are `OK <text>` or `ERR <CODE> <message>`; listings are an `OK`
//! header, one line per item, then `END`.

use crate::core_types::{AccountId, FeedbackId, LoanId, UserId};
use crate::error::{BankError, BankResult};
use crate::models::{Role, RoleChoice};
use crate::money::parse_amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserField {
    Password,
    FirstName,
    LastName,
    Phone,
    Email,
    Address,
    Role,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Login {
        choice: RoleChoice,
        user_id: UserId,
        password: String,
    },
    Logout,
    Quit,
    Me,
    Passwd(String),
    Balance,
    Deposit(f64),
    Withdraw(f64),
    Transfer {
        to: AccountId,
        amount: f64,
    },
    History(Option<AccountId>),
    LoanApply(f64),
    LoanList,
    LoanUnassigned,
    LoanAssigned,
    LoanAssign {
        loan_id: LoanId,
        employee_id: UserId,
    },
    LoanDecide {
        loan_id: LoanId,
        approve: bool,
    },
    FeedbackAdd(String),
    FeedbackList,
    FeedbackPending,
    FeedbackReview(FeedbackId),
    UserAdd {
        role: Role,
        password: String,
        first_name: String,
        last_name: String,
        phone: String,
        email: String,
        address: String,
    },
    UserModify {
        user_id: UserId,
        field: UserField,
        value: String,
    },
    UserStatus {
        user_id: UserId,
        active: bool,
    },
    AccountOpen(UserId),
}

impl Command {
    /// Verb as shown in error messages
    pub fn name(&self) -> &'static str {
        match self {
            Command::Login { .. } => "LOGIN",
            Command::Logout => "LOGOUT",
            Command::Quit => "QUIT",
            Command::Me => "ME",
            Command::Passwd(_) => "PASSWD",
            Command::Balance => "BALANCE",
            Command::Deposit(_) => "DEPOSIT",
            Command::Withdraw(_) => "WITHDRAW",
            Command::Transfer { .. } => "TRANSFER",
            Command::History(_) => "HISTORY",
            Command::LoanApply(_) => "LOAN APPLY",
            Command::LoanList => "LOAN LIST",
            Command::LoanUnassigned => "LOAN UNASSIGNED",
            Command::LoanAssigned => "LOAN ASSIGNED",
            Command::LoanAssign { .. } => "LOAN ASSIGN",
            Command::LoanDecide { approve: true, .. } => "LOAN APPROVE",
            Command::LoanDecide { approve: false, .. } => "LOAN REJECT",
            Command::FeedbackAdd(_) => "FEEDBACK ADD",
            Command::FeedbackList => "FEEDBACK LIST",
            Command::FeedbackPending => "FEEDBACK PENDING",
            Command::FeedbackReview(_) => "FEEDBACK REVIEW",
            Command::UserAdd { .. } => "USER ADD",
            Command::UserModify { .. } => "USER MODIFY",
            Command::UserStatus { active: true, .. } => "USER ACTIVATE",
            Command::UserStatus { active: false, .. } => "USER DEACTIVATE",
            Command::AccountOpen(_) => "ACCOUNT OPEN",
        }
    }
}

fn invalid(msg: impl Into<String>) -> BankError {
    BankError::InvalidInput(msg.into())
}

/// Token cursor over one command line
struct Args<'a> {
    tokens: Vec<&'a str>,
    pos: usize,
    line: &'a str,
}

impl<'a> Args<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            tokens: line.split_whitespace().collect(),
            pos: 0,
            line,
        }
    }

    fn next(&mut self, what: &str) -> BankResult<&'a str> {
        let token = self
            .tokens
            .get(self.pos)
            .ok_or_else(|| invalid(format!("missing {}", what)))?;
        self.pos += 1;
        Ok(token)
    }

    fn word(&mut self, what: &str) -> BankResult<String> {
        self.next(what).map(str::to_string)
    }

    fn id(&mut self, what: &str) -> BankResult<i32> {
        let raw = self.next(what)?;
        match raw.parse::<i32>() {
            Ok(id) if id > 0 => Ok(id),
            _ => Err(invalid(format!("{} must be a positive integer, got '{}'", what, raw))),
        }
    }

    fn amount(&mut self) -> BankResult<f64> {
        parse_amount(self.next("amount")?)
    }

    /// Everything left on the line, original spacing kept
    fn rest(&mut self, what: &str) -> BankResult<String> {
        if self.pos >= self.tokens.len() {
            return Err(invalid(format!("missing {}", what)));
        }
        let mut rest = self.line.trim_start();
        for _ in 0..self.pos {
            rest = rest.trim_start();
            let token_len = rest.find(char::is_whitespace).unwrap_or(rest.len());
            rest = &rest[token_len..];
        }
        self.pos = self.tokens.len();
        Ok(rest.trim().to_string())
    }

    fn finish(&self) -> BankResult<()> {
        match self.tokens.get(self.pos) {
            Some(extra) => Err(invalid(format!("unexpected argument '{}'", extra))),
            None => Ok(()),
        }
    }
}

pub(crate) fn parse_role(raw: &str) -> BankResult<Role> {
    match raw.to_ascii_uppercase().as_str() {
        "CUSTOMER" => Ok(Role::Customer),
        "EMPLOYEE" => Ok(Role::Employee),
        "MANAGER" => Ok(Role::Manager),
        "ADMINISTRATOR" | "ADMIN" => Ok(Role::Administrator),
        _ => Err(invalid(format!("unknown role '{}'", raw))),
    }
}

fn parse_user_field(raw: &str) -> BankResult<UserField> {
    match raw.to_ascii_uppercase().as_str() {
        "PASSWORD" => Ok(UserField::Password),
        "FIRST" => Ok(UserField::FirstName),
        "LAST" => Ok(UserField::LastName),
        "PHONE" => Ok(UserField::Phone),
        "EMAIL" => Ok(UserField::Email),
        "ADDRESS" => Ok(UserField::Address),
        "ROLE" => Ok(UserField::Role),
        _ => Err(invalid(format!("unknown user field '{}'", raw))),
    }
}

pub fn parse(line: &str) -> BankResult<Command> {
    let mut args = Args::new(line);
    let verb = args.next("command")?.to_ascii_uppercase();

    let cmd = match verb.as_str() {
        "LOGIN" => {
            let raw = args.next("role choice")?;
            let choice = raw
                .parse::<u8>()
                .map_err(|_| invalid(format!("role choice must be 1-4, got '{}'", raw)))
                .and_then(RoleChoice::try_from)?;
            Command::Login {
                choice,
                user_id: args.id("user id")?,
                password: args.word("password")?,
            }
        }
        "LOGOUT" => Command::Logout,
        "QUIT" | "EXIT" => Command::Quit,
        "ME" => Command::Me,
        "PASSWD" => Command::Passwd(args.word("new password")?),
        "BALANCE" => Command::Balance,
        "DEPOSIT" => Command::Deposit(args.amount()?),
        "WITHDRAW" => Command::Withdraw(args.amount()?),
        "TRANSFER" => Command::Transfer {
            to: args.id("receiver id")?,
            amount: args.amount()?,
        },
        "HISTORY" => {
            if args.tokens.len() > 1 {
                Command::History(Some(args.id("account id")?))
            } else {
                Command::History(None)
            }
        }
        "LOAN" => match args.next("loan action")?.to_ascii_uppercase().as_str() {
            "APPLY" => Command::LoanApply(args.amount()?),
            "LIST" => Command::LoanList,
            "UNASSIGNED" => Command::LoanUnassigned,
            "ASSIGNED" => Command::LoanAssigned,
            "ASSIGN" => Command::LoanAssign {
                loan_id: args.id("loan id")?,
                employee_id: args.id("employee id")?,
            },
            "APPROVE" => Command::LoanDecide {
                loan_id: args.id("loan id")?,
                approve: true,
            },
            "REJECT" => Command::LoanDecide {
                loan_id: args.id("loan id")?,
                approve: false,
            },
            other => return Err(invalid(format!("unknown LOAN action '{}'", other))),
        },
        "FEEDBACK" => match args.next("feedback action")?.to_ascii_uppercase().as_str() {
            "ADD" => Command::FeedbackAdd(args.rest("feedback text")?),
            "LIST" => Command::FeedbackList,
            "PENDING" => Command::FeedbackPending,
            "REVIEW" => Command::FeedbackReview(args.id("feedback id")?),
            other => return Err(invalid(format!("unknown FEEDBACK action '{}'", other))),
        },
        "USER" => match args.next("user action")?.to_ascii_uppercase().as_str() {
            "ADD" => Command::UserAdd {
                role: parse_role(args.next("role")?)?,
                password: args.word("password")?,
                first_name: args.word("first name")?,
                last_name: args.word("last name")?,
                phone: args.word("phone")?,
                email: args.word("email")?,
                address: args.rest("address")?,
            },
            "MODIFY" => Command::UserModify {
                user_id: args.id("user id")?,
                field: parse_user_field(args.next("field")?)?,
                value: args.rest("value")?,
            },
            "ACTIVATE" => Command::UserStatus {
                user_id: args.id("user id")?,
                active: true,
            },
            "DEACTIVATE" => Command::UserStatus {
                user_id: args.id("user id")?,
                active: false,
            },
            other => return Err(invalid(format!("unknown USER action '{}'", other))),
        },
        "ACCOUNT" => match args.next("account action")?.to_ascii_uppercase().as_str() {
            "OPEN" => Command::AccountOpen(args.id("user id")?),
            other => return Err(invalid(format!("unknown ACCOUNT action '{}'", other))),
        },
        other => return Err(invalid(format!("unknown command '{}'", other))),
    };

    args.finish()?;
    Ok(cmd)
}

// ============================================================
// REPLIES
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok(String),
    Err { code: &'static str, message: String },
    List { header: String, lines: Vec<String> },
}

impl Reply {
    pub fn ok(text: impl Into<String>) -> Self {
        Reply::Ok(text.into())
    }

    pub fn err(code: &'static str, message: impl Into<String>) -> Self {
        Reply::Err {
            code,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self, Reply::Err { .. })
    }

    /// Wire form, newline-terminated
    pub fn render(&self) -> String {
        match self {
            Reply::Ok(text) => format!("OK {}\n", text),
            Reply::Err { code, message } => format!("ERR {} {}\n", code, message),
            Reply::List { header, lines } => {
                let mut out = format!("OK {}\n", header);
                for line in lines {
                    out.push_str(line);
                    out.push('\n');
                }
                out.push_str("END\n");
                out
            }
        }
    }
}

impl From<BankError> for Reply {
    fn from(e: BankError) -> Self {
        Reply::err(e.code(), e.to_string())
    }
}
