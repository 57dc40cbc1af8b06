//! Per-connection command loop
//!
//! Each connection owns at most one session. Bank calls block on file I/O,
//! so they run on tokio's blocking pool; no core lock outlives a call, so
//! none is held across a socket round-trip.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::bank::{Bank, NewUser, UserPatch};
use crate::core_types::UserId;
use crate::error::BankError;
use crate::models::{Feedback, Loan, Role, RoleChoice, TransactionEntry, User};
use crate::session::SessionGuard;
use crate::transfer::TransferRequest;

use super::ServerContext;
use super::protocol::{self, Command, Reply, UserField};
use super::roles::{self, Access};

const GREETING: &str = "OK vaultline ready\n";

/// Whether the connection stays open after a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

struct Session {
    // Dropping the guard frees the user's slot in the registry
    _guard: SessionGuard,
    user_id: UserId,
    role: Role,
}

/// Run `f` against the bank on the blocking pool
async fn on_bank<T, E, F>(bank: &Arc<Bank>, f: F) -> Result<T, E>
where
    F: FnOnce(&Bank) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<BankError> + Send + 'static,
{
    let bank = bank.clone();
    tokio::task::spawn_blocking(move || f(&bank))
        .await
        .map_err(|e| E::from(BankError::IoFailure(format!("bank task failed: {}", e))))?
}

pub struct Connection {
    ctx: Arc<ServerContext>,
    session: Option<Session>,
}

impl Connection {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx, session: None }
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.session.as_ref().map(|s| s.user_id)
    }

    /// Parse, authorize and execute one command line
    pub async fn handle_line(&mut self, line: &str) -> (Reply, Flow) {
        let cmd = match protocol::parse(line) {
            Ok(cmd) => cmd,
            Err(e) => return (e.into(), Flow::Continue),
        };

        let role = self.session.as_ref().map(|s| s.role);
        let access = roles::access(&cmd);
        if !access.permits(role) {
            let reply = match (access, role) {
                (Access::Roles(_), None) => Reply::err(
                    "NOT_LOGGED_IN",
                    format!("{} requires a login", cmd.name()),
                ),
                _ => Reply::err(
                    "FORBIDDEN",
                    format!("{} is not allowed for this role", cmd.name()),
                ),
            };
            return (reply, Flow::Continue);
        }

        match cmd {
            Command::Quit => (Reply::ok("Goodbye"), Flow::Close),
            Command::Login {
                choice,
                user_id,
                password,
            } => (self.login(choice, user_id, password).await, Flow::Continue),
            Command::Logout => {
                if let Some(session) = self.session.take() {
                    info!(user_id = session.user_id, "Logged out");
                }
                (Reply::ok("Logged out"), Flow::Continue)
            }
            cmd => {
                let Some((user_id, role)) = self.session.as_ref().map(|s| (s.user_id, s.role))
                else {
                    return (
                        Reply::err("NOT_LOGGED_IN", format!("{} requires a login", cmd.name())),
                        Flow::Continue,
                    );
                };
                let reply = self
                    .execute(cmd, user_id, role)
                    .await
                    .unwrap_or_else(Reply::from);
                (reply, Flow::Continue)
            }
        }
    }

    async fn login(&mut self, choice: RoleChoice, user_id: UserId, password: String) -> Reply {
        if self.session.is_some() {
            return Reply::err("ALREADY_LOGGED_IN", "this connection already has a session");
        }

        let user = match on_bank(&self.ctx.bank, move |bank| {
            bank.authenticate(user_id, &password, choice)
        })
        .await
        {
            Ok(user) => user,
            Err(e) => {
                warn!(user_id, code = e.code(), "Login rejected");
                return Reply::err(e.code(), e.to_string());
            }
        };

        let guard = match self.ctx.sessions.try_acquire(user.user_id) {
            Ok(guard) => guard,
            Err(e) => {
                warn!(user_id, code = e.code(), "Session refused");
                return Reply::err(e.code(), e.to_string());
            }
        };

        info!(user_id, role = %user.role, "Logged in");
        self.session = Some(Session {
            _guard: guard,
            user_id: user.user_id,
            role: user.role,
        });
        Reply::ok(format!(
            "Welcome {} {} ({})",
            user.first_name, user.last_name, user.role
        ))
    }

    async fn execute(
        &self,
        cmd: Command,
        actor: UserId,
        role: Role,
    ) -> Result<Reply, BankError> {
        let bank = &self.ctx.bank;
        let any_user = roles::acts_on_any_user(role);

        let reply = match cmd {
            Command::Me => {
                let user = on_bank(bank, move |b| b.user_details(actor)).await?;
                Reply::ok(describe_user(&user))
            }
            Command::Passwd(new_password) => {
                on_bank(bank, move |b| b.change_password(actor, &new_password)).await?;
                Reply::ok("Password changed")
            }

            Command::Balance => {
                let account = on_bank(bank, move |b| b.account(actor)).await?;
                Reply::ok(format!(
                    "account={} balance={:.2}",
                    account.account_number, account.balance
                ))
            }
            Command::Deposit(amount) => {
                let account = on_bank(bank, move |b| b.deposit(actor, amount)).await?;
                Reply::ok(format!("balance={:.2}", account.balance))
            }
            Command::Withdraw(amount) => {
                let account = on_bank(bank, move |b| b.withdraw(actor, amount)).await?;
                Reply::ok(format!("balance={:.2}", account.balance))
            }
            Command::Transfer { to, amount } => {
                let request = TransferRequest {
                    from: actor,
                    to,
                    amount,
                };
                let receipt = on_bank(bank, move |b| b.transfer(&request)).await?;
                Reply::ok(format!(
                    "transfer={} balance={:.2}",
                    receipt.transfer_id, receipt.from_balance
                ))
            }
            Command::History(account) => {
                let account_id = account.unwrap_or(actor);
                let entries = on_bank(bank, move |b| b.history(account_id)).await?;
                listing(format!("{} transactions", entries.len()), &entries, describe_entry)
            }

            Command::LoanApply(amount) => {
                let loan = on_bank(bank, move |b| b.apply_loan(actor, amount)).await?;
                Reply::ok(format!("loan={} status={}", loan.loan_id, loan.status.as_str()))
            }
            Command::LoanList => {
                let loans = on_bank(bank, move |b| b.loans_for_user(actor)).await?;
                listing(format!("{} loans", loans.len()), &loans, describe_loan)
            }
            Command::LoanUnassigned => {
                let loans = on_bank(bank, |b| b.unassigned_loans()).await?;
                listing(format!("{} loans", loans.len()), &loans, describe_loan)
            }
            Command::LoanAssigned => {
                let loans = on_bank(bank, move |b| b.assigned_loans(actor)).await?;
                listing(format!("{} loans", loans.len()), &loans, describe_loan)
            }
            Command::LoanAssign {
                loan_id,
                employee_id,
            } => {
                let loan = on_bank(bank, move |b| b.assign_loan(loan_id, employee_id)).await?;
                Reply::ok(describe_loan(&loan))
            }
            Command::LoanDecide { loan_id, approve } => {
                let loan =
                    on_bank(bank, move |b| b.process_loan(loan_id, actor, approve)).await?;
                Reply::ok(describe_loan(&loan))
            }

            Command::FeedbackAdd(text) => {
                let feedback = on_bank(bank, move |b| b.add_feedback(actor, &text)).await?;
                Reply::ok(format!("feedback={}", feedback.feedback_id))
            }
            Command::FeedbackList => {
                let items = on_bank(bank, move |b| b.feedback_for_user(actor)).await?;
                listing(format!("{} feedback", items.len()), &items, describe_feedback)
            }
            Command::FeedbackPending => {
                let items = on_bank(bank, |b| b.unreviewed_feedback()).await?;
                listing(format!("{} feedback", items.len()), &items, describe_feedback)
            }
            Command::FeedbackReview(feedback_id) => {
                let feedback = on_bank(bank, move |b| b.review_feedback(feedback_id)).await?;
                Reply::ok(describe_feedback(&feedback))
            }

            Command::UserAdd {
                role: new_role,
                password,
                first_name,
                last_name,
                phone,
                email,
                address,
            } => {
                if !any_user && new_role != Role::Customer {
                    return Ok(forbidden("only customers may be created with this role"));
                }
                let new = NewUser {
                    role: new_role,
                    password,
                    first_name,
                    last_name,
                    phone,
                    email,
                    address,
                };
                let user = on_bank(bank, move |b| b.create_user(new)).await?;
                info!(actor, user_id = user.user_id, role = %user.role, "User added");
                Reply::ok(format!("user={} role={}", user.user_id, user.role))
            }
            Command::UserModify {
                user_id,
                field,
                value,
            } => {
                if field == UserField::Role && !any_user {
                    return Ok(forbidden("role changes require an administrator"));
                }
                let patch = build_patch(field, value)?;
                let user = on_bank(bank, move |b| {
                    b.modify_user(user_id, patch, any_user, !any_user)
                })
                .await?;
                Reply::ok(describe_user(&user))
            }
            Command::UserStatus { user_id, active } => {
                on_bank(bank, move |b| b.set_user_active(user_id, active, !any_user)).await?;
                info!(actor, user_id, active, "User status set");
                Reply::ok(format!(
                    "user={} {}",
                    user_id,
                    if active { "activated" } else { "deactivated" }
                ))
            }
            Command::AccountOpen(user_id) => {
                let account = on_bank(bank, move |b| b.open_account(user_id)).await?;
                Reply::ok(format!("account={}", account.account_number))
            }

            Command::Login { .. } | Command::Logout | Command::Quit => {
                Reply::err("INVALID_INPUT", "session commands are not executed here")
            }
        };
        Ok(reply)
    }
}

fn forbidden(message: &str) -> Reply {
    Reply::err("FORBIDDEN", message)
}

fn build_patch(field: UserField, value: String) -> Result<UserPatch, BankError> {
    let mut patch = UserPatch::default();
    match field {
        UserField::Password => patch.password = Some(value),
        UserField::FirstName => patch.first_name = Some(value),
        UserField::LastName => patch.last_name = Some(value),
        UserField::Phone => patch.phone = Some(value),
        UserField::Email => patch.email = Some(value),
        UserField::Address => patch.address = Some(value),
        UserField::Role => patch.role = Some(protocol::parse_role(&value)?),
    }
    Ok(patch)
}

fn listing<T>(header: String, items: &[T], describe: fn(&T) -> String) -> Reply {
    Reply::List {
        header,
        lines: items.iter().map(describe).collect(),
    }
}

fn describe_user(user: &User) -> String {
    format!(
        "user={} role={} active={} name={} {} phone={} email={} address={}",
        user.user_id,
        user.role,
        user.is_active,
        user.first_name,
        user.last_name,
        user.phone,
        user.email,
        user.address
    )
}

fn describe_entry(entry: &TransactionEntry) -> String {
    format!(
        "{} {} {:.2} balance={:.2} {}",
        entry.transaction_id,
        entry.kind.as_str(),
        entry.amount,
        entry.new_balance,
        entry.counterparty
    )
}

fn describe_loan(loan: &Loan) -> String {
    format!(
        "loan={} user={} account={} amount={:.2} status={} employee={}",
        loan.loan_id,
        loan.user_id,
        loan.account_id_to_deposit,
        loan.amount,
        loan.status.as_str(),
        loan.assigned_to_employee_id
    )
}

fn describe_feedback(feedback: &Feedback) -> String {
    format!(
        "feedback={} user={} reviewed={} {}",
        feedback.feedback_id, feedback.user_id, feedback.is_reviewed, feedback.text
    )
}

/// Serve one client until QUIT, EOF or a socket error
pub async fn handle_connection(stream: TcpStream, ctx: Arc<ServerContext>) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut conn = Connection::new(ctx);

    writer.write_all(GREETING.as_bytes()).await?;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (reply, flow) = conn.handle_line(line).await;
        writer.write_all(reply.render().as_bytes()).await?;
        if flow == Flow::Close {
            break;
        }
    }
    writer.flush().await?;
    if let Some(user_id) = conn.user_id() {
        debug!(user_id, "Connection closed with live session; releasing");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::session::SessionRegistry;
    use tempfile::TempDir;

    fn context() -> (TempDir, Arc<ServerContext>) {
        let dir = TempDir::new().unwrap();
        let bank = Bank::open(&StorageConfig {
            data_dir: dir.path().to_path_buf(),
            sync_writes: false,
        })
        .unwrap();
        for (role, email) in [
            (Role::Customer, "c1@x.com"),
            (Role::Customer, "c2@x.com"),
            (Role::Employee, "e@x.com"),
        ] {
            bank.create_user(NewUser {
                role,
                password: "pw1234".into(),
                first_name: "F".into(),
                last_name: "L".into(),
                phone: "99".into(),
                email: email.into(),
                address: "Here".into(),
            })
            .unwrap();
        }
        let ctx = Arc::new(ServerContext {
            bank: Arc::new(bank),
            sessions: Arc::new(SessionRegistry::new(8)),
        });
        (dir, ctx)
    }

    async fn send(conn: &mut Connection, line: &str) -> String {
        conn.handle_line(line).await.0.render()
    }

    #[tokio::test]
    async fn test_login_required_and_role_checked() {
        let (_dir, ctx) = context();
        let mut conn = Connection::new(ctx.clone());

        assert!(send(&mut conn, "BALANCE").await.starts_with("ERR NOT_LOGGED_IN"));
        assert!(send(&mut conn, "LOGIN 3 1 pw1234").await.starts_with("ERR ROLE_MISMATCH"));
        assert!(send(&mut conn, "LOGIN 4 1 nope").await.starts_with("ERR INVALID_CREDENTIALS"));
        assert!(send(&mut conn, "LOGIN 4 1 pw1234").await.starts_with("OK Welcome"));
        assert!(ctx.sessions.is_active(1));

        assert!(send(&mut conn, "LOAN UNASSIGNED").await.starts_with("ERR FORBIDDEN"));
        assert!(send(&mut conn, "LOGIN 4 1 pw1234").await.starts_with("ERR ALREADY_LOGGED_IN"));

        send(&mut conn, "LOGOUT").await;
        assert!(!ctx.sessions.is_active(1));
    }

    #[tokio::test]
    async fn test_one_session_per_user() {
        let (_dir, ctx) = context();
        let mut first = Connection::new(ctx.clone());
        let mut second = Connection::new(ctx.clone());

        assert!(send(&mut first, "LOGIN 4 2 pw1234").await.starts_with("OK"));
        assert!(send(&mut second, "LOGIN 4 2 pw1234").await.starts_with("ERR ALREADY_LOGGED_IN"));

        drop(first);
        assert!(send(&mut second, "LOGIN 4 2 pw1234").await.starts_with("OK"));
    }

    #[tokio::test]
    async fn test_money_commands() {
        let (_dir, ctx) = context();
        let mut conn = Connection::new(ctx.clone());
        send(&mut conn, "LOGIN 4 1 pw1234").await;

        assert_eq!(send(&mut conn, "DEPOSIT 100.25").await, "OK balance=100.25\n");
        assert!(send(&mut conn, "WITHDRAW 500").await.starts_with("ERR INSUFFICIENT_FUNDS"));
        assert_eq!(send(&mut conn, "TRANSFER 2 40").await, "OK transfer=1 balance=60.25\n");
        assert!(send(&mut conn, "DEPOSIT 1.005").await.starts_with("ERR INVALID_INPUT"));

        let history = send(&mut conn, "HISTORY").await;
        assert!(history.starts_with("OK 2 transactions\n"));
        assert!(history.contains("TRANSFER_OUT"));
        assert!(history.ends_with("END\n"));

        assert_eq!(ctx.bank.account(2).unwrap().balance, 40.0);
    }

    #[tokio::test]
    async fn test_employee_may_only_add_customers() {
        let (_dir, ctx) = context();
        let mut conn = Connection::new(ctx);
        send(&mut conn, "LOGIN 3 3 pw1234").await;

        assert!(
            send(&mut conn, "USER ADD manager pw1234 A B 1 m@x.com Road")
                .await
                .starts_with("ERR FORBIDDEN")
        );
        assert_eq!(
            send(&mut conn, "USER ADD customer pw1234 A B 1 n@x.com 4 Park Road").await,
            "OK user=4 role=CUSTOMER\n"
        );
        assert!(
            send(&mut conn, "USER MODIFY 3 ROLE manager")
                .await
                .starts_with("ERR FORBIDDEN")
        );
        assert!(
            send(&mut conn, "USER MODIFY 4 PHONE 12345")
                .await
                .contains("phone=12345")
        );
    }
}
