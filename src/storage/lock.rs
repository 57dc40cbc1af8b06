//! Record Lock Manager
//!
//! Blocking advisory locks over one store file at two granularities:
//! the whole file, and a single record's byte range. Conflicts follow POSIX
//! byte-range semantics where the whole-file range overlaps every record:
//!
//! ```text
//! held \ wanted   file S   file X   rec S(i)   rec X(i)
//! file S          ok       wait     ok         wait
//! file X          wait     wait     wait       wait
//! rec S(i)        ok       wait     ok         wait
//! rec X(i)        wait     wait     wait       wait
//! ```
//!
//! Records with different indexes never conflict. There is no timeout;
//! deadlock freedom comes from callers taking record locks in ascending
//! index order ([`LockManager::lock_records_ordered`]).

use rustc_hash::FxHashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::core_types::RecordIndex;
use crate::error::{BankError, BankResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    WholeFile,
    Record(RecordIndex),
}

#[derive(Debug, Default)]
struct RangeState {
    readers: usize,
    writer: bool,
}

#[derive(Debug, Default)]
struct LockTable {
    file_readers: usize,
    file_writer: bool,
    record_readers: usize,
    record_writers: usize,
    records: FxHashMap<RecordIndex, RangeState>,
}

impl LockTable {
    fn can_grant(&self, scope: LockScope, mode: LockMode) -> bool {
        match (scope, mode) {
            (LockScope::WholeFile, LockMode::Shared) => {
                !self.file_writer && self.record_writers == 0
            }
            (LockScope::WholeFile, LockMode::Exclusive) => {
                !self.file_writer
                    && self.file_readers == 0
                    && self.record_readers == 0
                    && self.record_writers == 0
            }
            (LockScope::Record(i), LockMode::Shared) => {
                !self.file_writer && !self.records.get(&i).is_some_and(|r| r.writer)
            }
            (LockScope::Record(i), LockMode::Exclusive) => {
                !self.file_writer
                    && self.file_readers == 0
                    && self
                        .records
                        .get(&i)
                        .is_none_or(|r| !r.writer && r.readers == 0)
            }
        }
    }

    fn grant(&mut self, scope: LockScope, mode: LockMode) {
        match (scope, mode) {
            (LockScope::WholeFile, LockMode::Shared) => self.file_readers += 1,
            (LockScope::WholeFile, LockMode::Exclusive) => self.file_writer = true,
            (LockScope::Record(i), LockMode::Shared) => {
                self.records.entry(i).or_default().readers += 1;
                self.record_readers += 1;
            }
            (LockScope::Record(i), LockMode::Exclusive) => {
                self.records.entry(i).or_default().writer = true;
                self.record_writers += 1;
            }
        }
    }

    fn release(&mut self, scope: LockScope, mode: LockMode) {
        match (scope, mode) {
            (LockScope::WholeFile, LockMode::Shared) => self.file_readers -= 1,
            (LockScope::WholeFile, LockMode::Exclusive) => self.file_writer = false,
            (LockScope::Record(i), mode) => {
                if let Some(state) = self.records.get_mut(&i) {
                    match mode {
                        LockMode::Shared => {
                            state.readers -= 1;
                            self.record_readers -= 1;
                        }
                        LockMode::Exclusive => {
                            state.writer = false;
                            self.record_writers -= 1;
                        }
                    }
                    if state.readers == 0 && !state.writer {
                        self.records.remove(&i);
                    }
                }
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.file_readers == 0
            && !self.file_writer
            && self.record_readers == 0
            && self.record_writers == 0
    }
}

/// Lock table for one store file
#[derive(Debug)]
pub struct LockManager {
    name: &'static str,
    table: Mutex<LockTable>,
    released: Condvar,
}

impl LockManager {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            table: Mutex::new(LockTable::default()),
            released: Condvar::new(),
        }
    }

    // Table updates cannot panic midway, so a poisoned table is still consistent.
    fn table(&self) -> MutexGuard<'_, LockTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the lock is granted
    pub fn lock(&self, scope: LockScope, mode: LockMode) -> LockGuard<'_> {
        let table = self.table();
        let mut table = self
            .released
            .wait_while(table, |t| !t.can_grant(scope, mode))
            .unwrap_or_else(PoisonError::into_inner);
        table.grant(scope, mode);
        tracing::trace!(store = self.name, ?scope, ?mode, "lock granted");

        LockGuard {
            manager: self,
            scope,
            mode,
        }
    }

    /// Lock several records in ascending index order, whatever order the
    /// caller lists them in. Guards come back in ascending order too.
    pub fn lock_records_ordered(
        &self,
        indexes: &[RecordIndex],
        mode: LockMode,
    ) -> BankResult<Vec<LockGuard<'_>>> {
        let mut sorted = indexes.to_vec();
        sorted.sort_unstable();
        if sorted.windows(2).any(|w| w[0] == w[1]) {
            return Err(BankError::Conflict(format!(
                "record locked twice in one request on {}",
                self.name
            )));
        }

        // An early return drops the guards already taken.
        Ok(sorted
            .into_iter()
            .map(|i| self.lock(LockScope::Record(i), mode))
            .collect())
    }

    /// True when no lock of any kind is held
    pub fn is_idle(&self) -> bool {
        self.table().is_idle()
    }

    fn release(&self, scope: LockScope, mode: LockMode) {
        self.table().release(scope, mode);
        self.released.notify_all();
        tracing::trace!(store = self.name, ?scope, ?mode, "lock released");
    }
}

/// Held lock; released on drop
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LockGuard<'a> {
    manager: &'a LockManager,
    scope: LockScope,
    mode: LockMode,
}

impl LockGuard<'_> {
    pub fn scope(&self) -> LockScope {
        self.scope
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub(crate) fn belongs_to(&self, manager: &LockManager) -> bool {
        std::ptr::eq(self.manager, manager)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(self.scope, self.mode);
    }
}
