//! User management and authentication

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use thiserror::Error;

use crate::core_types::{UserId, narrow_id};
use crate::error::{BankError, BankResult};
use crate::models::{
    ADDRESS_LEN, Account, EMAIL_LEN, NAME_LEN, PHONE_LEN, Role, RoleChoice, User,
};
use crate::storage::Record;

use super::Bank;
use super::validation::{require_text, validate_email, validate_password};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("Invalid user id or password")]
    InvalidCredentials,

    #[error("Account is deactivated")]
    Deactivated,

    #[error("Role does not match this user")]
    RoleMismatch,

    #[error(transparent)]
    Storage(#[from] BankError),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::Deactivated => "INACTIVE",
            AuthError::RoleMismatch => "ROLE_MISMATCH",
            AuthError::Storage(e) => e.code(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub role: Role,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub email: String,
    pub address: String,
}

/// Fields to change; `None` keeps the current value
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub role: Option<Role>,
}

fn hash_password(password: &str) -> BankResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| BankError::IoFailure(format!("password hashing failed: {}", e)))
}

fn verify_password(user: &User, password: &str) -> bool {
    match PasswordHash::new(&user.password) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(user_id = user.user_id, error = %e, "Stored password hash is unreadable");
            false
        }
    }
}

fn email_taken(email: &str) -> BankError {
    BankError::Conflict(format!("email '{}' is already in use", email))
}

impl Bank {
    /// Create a user; a customer also gets their account
    ///
    /// The user record is the commit point. If the account append fails the
    /// user is still returned and `open_account` can add the account later.
    pub fn create_user(&self, new: NewUser) -> BankResult<User> {
        validate_password(&new.password)?;
        require_text("first name", &new.first_name, NAME_LEN)?;
        require_text("last name", &new.last_name, NAME_LEN)?;
        require_text("phone", &new.phone, PHONE_LEN)?;
        validate_email(&new.email, EMAIL_LEN)?;
        require_text("address", &new.address, ADDRESS_LEN)?;
        let password = hash_password(&new.password)?;

        let claims = self.email_claims();
        let (_, user) = self.users.append_checked(
            |existing| {
                if existing.email == new.email {
                    return Err(email_taken(&new.email));
                }
                Ok(())
            },
            |next| {
                Ok(User {
                    user_id: narrow_id(next, User::TABLE)?,
                    password,
                    role: new.role,
                    is_active: true,
                    first_name: new.first_name,
                    last_name: new.last_name,
                    phone: new.phone,
                    email: new.email.clone(),
                    address: new.address,
                })
            },
        )?;
        drop(claims);

        tracing::info!(user_id = user.user_id, role = %user.role, "User created");

        if user.role == Role::Customer {
            if let Err(e) = self.accounts.append(&Account::new(user.user_id)) {
                tracing::error!(
                    user_id = user.user_id,
                    error = %e,
                    "Account creation failed; customer left without an account"
                );
            }
        }
        Ok(user)
    }

    /// Check credentials and the role picked at login
    pub fn authenticate(
        &self,
        user_id: UserId,
        password: &str,
        choice: RoleChoice,
    ) -> Result<User, AuthError> {
        let Some((_, user)) = self.users.find_by_id(user_id as i64)? else {
            return Err(AuthError::InvalidCredentials);
        };
        if !verify_password(&user, password) {
            return Err(AuthError::InvalidCredentials);
        }
        if !user.is_active {
            return Err(AuthError::Deactivated);
        }
        if user.role != choice.expected_role() {
            return Err(AuthError::RoleMismatch);
        }
        Ok(user)
    }

    pub fn change_password(&self, user_id: UserId, new_password: &str) -> BankResult<()> {
        validate_password(new_password)?;
        let hash = hash_password(new_password)?;
        let (index, _) = self.users.require_by_id(user_id as i64, "user")?;
        self.users.update_at(index, |user| {
            user.password = hash;
            Ok(())
        })?;
        tracing::info!(user_id, "Password changed");
        Ok(())
    }

    /// Apply `patch` to a user
    ///
    /// `allow_role_change` gates `patch.role`; `restrict_to_customers` refuses
    /// any target that is not a customer.
    pub fn modify_user(
        &self,
        user_id: UserId,
        patch: UserPatch,
        allow_role_change: bool,
        restrict_to_customers: bool,
    ) -> BankResult<User> {
        if let Some(p) = &patch.password {
            validate_password(p)?;
        }
        for (field, value, max) in [
            ("first name", &patch.first_name, NAME_LEN),
            ("last name", &patch.last_name, NAME_LEN),
            ("phone", &patch.phone, PHONE_LEN),
            ("address", &patch.address, ADDRESS_LEN),
        ] {
            if let Some(v) = value {
                require_text(field, v, max)?;
            }
        }
        if let Some(email) = &patch.email {
            validate_email(email, EMAIL_LEN)?;
        }
        if patch.role.is_some() && !allow_role_change {
            return Err(BankError::InvalidInput("role cannot be changed here".into()));
        }
        let password = patch.password.as_deref().map(hash_password).transpose()?;

        // Scan for the email before taking the record lock
        let _claims = patch.email.as_ref().map(|_| self.email_claims());
        if let Some(email) = &patch.email {
            let clash = self
                .users
                .find(|u| u.email == *email && u.user_id != user_id)?;
            if clash.is_some() {
                return Err(email_taken(email));
            }
        }

        let (index, _) = self.users.require_by_id(user_id as i64, "user")?;
        let updated = self.users.update_at(index, |user| {
            if restrict_to_customers && user.role != Role::Customer {
                return Err(BankError::Conflict(format!(
                    "user {} is not a customer",
                    user_id
                )));
            }
            if let Some(hash) = password {
                user.password = hash;
            }
            if let Some(v) = patch.first_name {
                user.first_name = v;
            }
            if let Some(v) = patch.last_name {
                user.last_name = v;
            }
            if let Some(v) = patch.phone {
                user.phone = v;
            }
            if let Some(v) = patch.email {
                user.email = v;
            }
            if let Some(v) = patch.address {
                user.address = v;
            }
            if let Some(v) = patch.role {
                user.role = v;
            }
            Ok(user.clone())
        })?;

        tracing::info!(user_id, "User details modified");
        Ok(updated)
    }

    pub fn user_details(&self, user_id: UserId) -> BankResult<User> {
        let (index, _) = self.users.require_by_id(user_id as i64, "user")?;
        self.users.read_at(index)
    }

    /// Activate or deactivate a user and their account
    ///
    /// The user record and the account record are updated one after the
    /// other, never locked together.
    pub fn set_user_active(
        &self,
        user_id: UserId,
        active: bool,
        restrict_to_customers: bool,
    ) -> BankResult<()> {
        let (index, _) = self.users.require_by_id(user_id as i64, "user")?;
        self.users.update_at(index, |user| {
            if restrict_to_customers && user.role != Role::Customer {
                return Err(BankError::Conflict(format!(
                    "user {} is not a customer",
                    user_id
                )));
            }
            user.is_active = active;
            Ok(())
        })?;

        if let Some((account_index, _)) = self.accounts.find_by_id(user_id as i64)? {
            self.accounts.update_at(account_index, |account| {
                account.is_active = active;
                Ok(())
            })?;
        }

        tracing::info!(user_id, active, "User status changed");
        Ok(())
    }

    /// Create the first administrator when the user table is empty
    pub fn ensure_admin(&self, password: &str) -> BankResult<Option<User>> {
        if !self.users.is_empty()? {
            return Ok(None);
        }
        let admin = self.create_user(NewUser {
            role: Role::Administrator,
            password: password.to_string(),
            first_name: "System".into(),
            last_name: "Administrator".into(),
            phone: "0000000000".into(),
            email: "admin@localhost.local".into(),
            address: "-".into(),
        })?;
        tracing::warn!(user_id = admin.user_id, "Bootstrap administrator created");
        Ok(Some(admin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::tests_support::open_bank;

    fn customer(email: &str) -> NewUser {
        NewUser {
            role: Role::Customer,
            password: "secret1".into(),
            first_name: "Ravi".into(),
            last_name: "Kumar".into(),
            phone: "8888888888".into(),
            email: email.into(),
            address: "12 MG Road".into(),
        }
    }

    // ============================================================
    // TDD Test 1: Customer creation also opens the account
    // ============================================================
    #[test]
    fn test_create_customer_opens_account() {
        let (_dir, bank) = open_bank();
        let user = bank.create_user(customer("ravi@gmail.com")).unwrap();
        assert_eq!(user.user_id, 1);
        assert_ne!(user.password, "secret1");

        let account = bank.account(user.user_id).unwrap();
        assert_eq!(account.account_number, "SB-1");
        assert_eq!(account.balance, 0.0);
        assert!(account.is_active);
    }

    #[test]
    fn test_duplicate_email_is_conflict() {
        let (_dir, bank) = open_bank();
        bank.create_user(customer("ravi@gmail.com")).unwrap();
        let err = bank.create_user(customer("ravi@gmail.com")).unwrap_err();
        assert!(matches!(err, BankError::Conflict(_)));
    }

    #[test]
    fn test_invalid_fields_are_rejected() {
        let (_dir, bank) = open_bank();
        let mut bad = customer("not-an-email");
        assert!(matches!(
            bank.create_user(bad.clone()),
            Err(BankError::InvalidInput(_))
        ));
        bad.email = "ok@bank.com".into();
        bad.phone = "1".repeat(PHONE_LEN + 1);
        assert!(matches!(
            bank.create_user(bad),
            Err(BankError::InvalidInput(_))
        ));
    }

    // ============================================================
    // TDD Test 2: Login checks password, activity and role
    // ============================================================
    #[test]
    fn test_authenticate() {
        let (_dir, bank) = open_bank();
        let user = bank.create_user(customer("a@b.com")).unwrap();
        let id = user.user_id;

        assert!(bank.authenticate(id, "secret1", RoleChoice::Customer).is_ok());
        assert_eq!(
            bank.authenticate(id, "wrong", RoleChoice::Customer).unwrap_err(),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            bank.authenticate(99, "secret1", RoleChoice::Customer).unwrap_err(),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            bank.authenticate(id, "secret1", RoleChoice::Manager).unwrap_err(),
            AuthError::RoleMismatch
        );

        bank.set_user_active(id, false, true).unwrap();
        assert_eq!(
            bank.authenticate(id, "secret1", RoleChoice::Customer).unwrap_err(),
            AuthError::Deactivated
        );
        assert!(!bank.account(id).unwrap().is_active);
    }

    #[test]
    fn test_change_password() {
        let (_dir, bank) = open_bank();
        let id = bank.create_user(customer("a@b.com")).unwrap().user_id;
        bank.change_password(id, "fresh-pass").unwrap();
        assert!(bank.authenticate(id, "fresh-pass", RoleChoice::Customer).is_ok());
        assert!(bank.authenticate(id, "secret1", RoleChoice::Customer).is_err());
    }

    // ============================================================
    // TDD Test 3: Modify respects role gates and email uniqueness
    // ============================================================
    #[test]
    fn test_modify_user() {
        let (_dir, bank) = open_bank();
        let a = bank.create_user(customer("a@b.com")).unwrap().user_id;
        bank.create_user(customer("c@d.com")).unwrap();
        let mut staff = customer("staff@bank.com");
        staff.role = Role::Employee;
        let emp = bank.create_user(staff).unwrap().user_id;

        let patch = UserPatch {
            phone: Some("7777".into()),
            ..Default::default()
        };
        assert_eq!(bank.modify_user(a, patch, false, true).unwrap().phone, "7777");

        let clash = UserPatch {
            email: Some("c@d.com".into()),
            ..Default::default()
        };
        assert!(matches!(
            bank.modify_user(a, clash, false, true),
            Err(BankError::Conflict(_))
        ));

        let promote = UserPatch {
            role: Some(Role::Manager),
            ..Default::default()
        };
        assert!(bank.modify_user(emp, promote.clone(), false, false).is_err());
        assert!(matches!(
            bank.modify_user(emp, UserPatch::default(), false, true),
            Err(BankError::Conflict(_))
        ));
        assert_eq!(
            bank.modify_user(emp, promote, true, false).unwrap().role,
            Role::Manager
        );
    }

    #[test]
    fn test_ensure_admin_only_on_empty_table() {
        let (_dir, bank) = open_bank();
        let admin = bank.ensure_admin("change-me").unwrap().unwrap();
        assert_eq!(admin.role, Role::Administrator);
        assert!(bank.ensure_admin("change-me").unwrap().is_none());
        assert!(
            bank.authenticate(admin.user_id, "change-me", RoleChoice::Administrator)
                .is_ok()
        );
    }

    // ============================================================
    // TDD Test 4: A lost account append can be repaired
    // ============================================================
    #[test]
    fn test_customer_without_account_can_open_one() {
        let (_dir, bank) = open_bank();
        bank.accounts.fail_next_write_at(0);

        let user = bank.create_user(customer("ravi@gmail.com")).unwrap();
        assert!(bank.users.find_by_id(user.user_id as i64).unwrap().is_some());
        assert!(matches!(
            bank.account(user.user_id),
            Err(BankError::NotFound(_))
        ));

        let account = bank.open_account(user.user_id).unwrap();
        assert_eq!(account.account_id, user.user_id);
        assert!(matches!(
            bank.open_account(user.user_id),
            Err(BankError::Conflict(_))
        ));
    }
}
