//! Command permissions
//!
//! Static table from command to the roles allowed to issue it. Finer rules
//! that depend on the target user (an employee may only create customers)
//! are applied by the handler.

use crate::models::Role;

use super::protocol::Command;

const ALL: &[Role] = &[
    Role::Customer,
    Role::Employee,
    Role::Manager,
    Role::Administrator,
];
const CUSTOMER: &[Role] = &[Role::Customer];
const EMPLOYEE: &[Role] = &[Role::Employee];
const MANAGER: &[Role] = &[Role::Manager];
const STAFF: &[Role] = &[Role::Employee, Role::Manager];
const EMPLOYEE_OR_ADMIN: &[Role] = &[Role::Employee, Role::Administrator];
const MANAGER_OR_ADMIN: &[Role] = &[Role::Manager, Role::Administrator];

/// Who may issue a command once logged in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// No session needed
    Open,
    Roles(&'static [Role]),
}

impl Access {
    pub fn permits(self, role: Option<Role>) -> bool {
        match self {
            Access::Open => true,
            Access::Roles(roles) => role.is_some_and(|r| roles.contains(&r)),
        }
    }
}

pub fn access(cmd: &Command) -> Access {
    use Command::*;
    match cmd {
        Login { .. } | Quit => Access::Open,
        Logout | Me | Passwd(_) => Access::Roles(ALL),

        Balance | Deposit(_) | Withdraw(_) | Transfer { .. } | History(None) => {
            Access::Roles(CUSTOMER)
        }
        History(Some(_)) => Access::Roles(STAFF),

        LoanApply(_) | LoanList => Access::Roles(CUSTOMER),
        LoanUnassigned | LoanAssign { .. } => Access::Roles(MANAGER),
        LoanAssigned | LoanDecide { .. } => Access::Roles(EMPLOYEE),

        FeedbackAdd(_) | FeedbackList => Access::Roles(CUSTOMER),
        FeedbackPending | FeedbackReview(_) => Access::Roles(MANAGER),

        UserAdd { .. } | UserModify { .. } | AccountOpen(_) => Access::Roles(EMPLOYEE_OR_ADMIN),
        UserStatus { .. } => Access::Roles(MANAGER_OR_ADMIN),
    }
}

/// Whether `actor` may act on users other than customers
pub fn acts_on_any_user(actor: Role) -> bool {
    actor == Role::Administrator
}
