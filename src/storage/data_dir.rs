//! Data directory layout and single-process ownership
//!
//! Record locks live in process memory, so exactly one server process may
//! own a data directory. Ownership is an exclusive OS lock on
//! `<data_dir>/.lock`, held for as long as the [`DataDir`] lives.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::{BankError, BankResult};

pub const USERS_FILE: &str = "users.dat";
pub const ACCOUNTS_FILE: &str = "accounts.dat";
pub const LOANS_FILE: &str = "loans.dat";
pub const FEEDBACK_FILE: &str = "feedback.dat";
pub const TRANSACTIONS_FILE: &str = "transactions.dat";
pub const TRANSFER_WAL_FILE: &str = "transfers.wal";

#[derive(Debug)]
pub struct DataDir {
    root: PathBuf,
    // Dropping the handle releases the OS lock.
    _lock: File,
}

impl DataDir {
    pub fn open(root: impl AsRef<Path>) -> BankResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(root.join(".lock"))?;
        fs2::FileExt::try_lock_exclusive(&lock_file).map_err(|_| {
            BankError::Conflict(format!(
                "data directory '{}' is in use by another process",
                root.display()
            ))
        })?;

        tracing::info!(data_dir = %root.display(), "Data directory locked");
        Ok(Self {
            root,
            _lock: lock_file,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}
