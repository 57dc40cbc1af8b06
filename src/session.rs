//! Session Registry
//!
//! At most one live login per user across all connections. One registry is
//! built at startup and shared by `Arc`; each login holds a [`SessionGuard`]
//! that frees the slot when the connection ends, however it ends.

use rustc_hash::FxHashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::core_types::UserId;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("User is already logged in")]
    AlreadyLoggedIn,

    #[error("Session table is full")]
    Full,
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::AlreadyLoggedIn => "ALREADY_LOGGED_IN",
            SessionError::Full => "SESSIONS_FULL",
        }
    }
}

#[derive(Debug)]
pub struct SessionRegistry {
    active: Mutex<FxHashSet<UserId>>,
    capacity: usize,
}

impl SessionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            active: Mutex::new(FxHashSet::default()),
            capacity,
        }
    }

    // Set operations cannot panic midway; a poisoned set is still valid.
    fn active(&self) -> MutexGuard<'_, FxHashSet<UserId>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the session slot for `user_id`; no side effect on error
    pub fn try_acquire(self: &Arc<Self>, user_id: UserId) -> Result<SessionGuard, SessionError> {
        let mut active = self.active();
        if active.contains(&user_id) {
            return Err(SessionError::AlreadyLoggedIn);
        }
        if active.len() >= self.capacity {
            return Err(SessionError::Full);
        }
        active.insert(user_id);
        drop(active);

        tracing::debug!(user_id, "Session opened");
        Ok(SessionGuard {
            registry: Arc::clone(self),
            user_id,
        })
    }

    /// Remove `user_id` if present
    pub fn release(&self, user_id: UserId) {
        if self.active().remove(&user_id) {
            tracing::debug!(user_id, "Session closed");
        }
    }

    pub fn is_active(&self, user_id: UserId) -> bool {
        self.active().contains(&user_id)
    }

    pub fn len(&self) -> usize {
        self.active().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One live login; releases its slot on drop
#[derive(Debug)]
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    user_id: UserId,
}

impl SessionGuard {
    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.release(self.user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_one_session_per_user() {
        let registry = Arc::new(SessionRegistry::new(10));
        let guard = registry.try_acquire(7).unwrap();
        assert_eq!(
            registry.try_acquire(7).unwrap_err(),
            SessionError::AlreadyLoggedIn
        );
        assert!(registry.is_active(7));

        drop(guard);
        assert!(!registry.is_active(7));
        assert!(registry.try_acquire(7).is_ok());
    }

    #[test]
    fn test_capacity_is_enforced_without_side_effect() {
        let registry = Arc::new(SessionRegistry::new(2));
        let _a = registry.try_acquire(1).unwrap();
        let _b = registry.try_acquire(2).unwrap();
        assert_eq!(registry.try_acquire(3).unwrap_err(), SessionError::Full);
        assert_eq!(registry.len(), 2);
        assert!(!registry.is_active(3));
    }

    #[test]
    fn test_release_of_absent_user_is_noop() {
        let registry = SessionRegistry::new(1);
        registry.release(42);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_logins_for_same_user_admit_one() {
        let registry = Arc::new(SessionRegistry::new(100));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let r = registry.clone();
                thread::spawn(move || r.try_acquire(5).map(std::mem::forget).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
    }
}
