//! Fixed-record file store
//!
//! A table is a headerless file of `R::SIZE`-byte records. Record `i` lives at
//! byte `i * R::SIZE` for its whole lifetime. Every operation opens the file,
//! takes the lock of its granularity, does its I/O and releases the lock on
//! every exit path through the guard.
//!
//! A trailing partial record (an append torn by a crash) is invisible to
//! scans and id allocation; the next append overwrites it.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use crate::core_types::RecordIndex;
use crate::error::{BankError, BankResult};

use super::codec::Record;
use super::lock::{LockGuard, LockManager, LockMode, LockScope};
use super::sequence;

pub struct RecordStore<R: Record> {
    path: PathBuf,
    locks: LockManager,
    sync_writes: bool,
    _record: PhantomData<fn() -> R>,
    #[cfg(test)]
    fail_next_write: std::sync::Mutex<Option<RecordIndex>>,
}

impl<R: Record> std::fmt::Debug for RecordStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("table", &R::TABLE)
            .field("path", &self.path)
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl<R: Record> RecordStore<R> {
    /// Bind a store to `path`. The file is created by the first append.
    pub fn open(path: impl Into<PathBuf>, sync_writes: bool) -> Self {
        Self {
            path: path.into(),
            locks: LockManager::new(R::TABLE),
            sync_writes,
            _record: PhantomData,
            #[cfg(test)]
            fail_next_write: std::sync::Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    // ============================================================
    // Whole-file operations
    // ============================================================

    /// Number of complete records
    pub fn len(&self) -> BankResult<u64> {
        let _guard = self.locks.lock(LockScope::WholeFile, LockMode::Shared);
        match self.open_read()? {
            Some(file) => self.complete_records(&file),
            None => Ok(0),
        }
    }

    pub fn is_empty(&self) -> BankResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Stream records from index 0 until `f` breaks, under a shared file lock
    pub fn visit<F>(&self, mut f: F) -> BankResult<()>
    where
        F: FnMut(RecordIndex, R) -> BankResult<ControlFlow<()>>,
    {
        let _guard = self.locks.lock(LockScope::WholeFile, LockMode::Shared);
        let Some(file) = self.open_read()? else {
            return Ok(());
        };
        let count = self.complete_records(&file)?;
        let mut reader = BufReader::new(file);
        let mut buf = vec![0u8; R::SIZE];

        for index in 0..count {
            reader.read_exact(&mut buf)?;
            let record = R::decode(&buf)?;
            if f(index, record)?.is_break() {
                break;
            }
        }
        Ok(())
    }

    /// First record matching `pred`
    pub fn find<P>(&self, mut pred: P) -> BankResult<Option<(RecordIndex, R)>>
    where
        P: FnMut(&R) -> bool,
    {
        let mut found = None;
        self.visit(|index, record| {
            if pred(&record) {
                found = Some((index, record));
                return Ok(ControlFlow::Break(()));
            }
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(found)
    }

    pub fn find_by_id(&self, id: i64) -> BankResult<Option<(RecordIndex, R)>> {
        self.find(|r| r.id() == id)
    }

    /// Like [`find_by_id`](Self::find_by_id), with `NotFound("<what> <id>")`
    pub fn require_by_id(&self, id: i64, what: &str) -> BankResult<(RecordIndex, R)> {
        self.find_by_id(id)?
            .ok_or_else(|| BankError::NotFound(format!("{} {}", what, id)))
    }

    /// Every record matching `pred`, in file order
    pub fn scan<P>(&self, mut pred: P) -> BankResult<Vec<(RecordIndex, R)>>
    where
        P: FnMut(&R) -> bool,
    {
        let mut out = Vec::new();
        self.visit(|index, record| {
            if pred(&record) {
                out.push((index, record));
            }
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(out)
    }

    /// Append at the end; returns the new record's index
    pub fn append(&self, record: &R) -> BankResult<RecordIndex> {
        let _guard = self.locks.lock(LockScope::WholeFile, LockMode::Exclusive);
        let mut file = self.open_write()?;
        let index = self.complete_records(&file)?;
        self.write_record(&mut file, index, record)?;
        Ok(index)
    }

    /// Allocate the next id and append the record `build` makes from it, in
    /// one exclusive lock span
    pub fn append_with<B>(&self, build: B) -> BankResult<(RecordIndex, R)>
    where
        B: FnOnce(i64) -> BankResult<R>,
    {
        self.append_inner(None::<fn(&R) -> BankResult<()>>, build)
    }

    /// As [`append_with`](Self::append_with), first running `check` over every
    /// existing record inside the same lock span (uniqueness constraints)
    pub fn append_checked<C, B>(&self, check: C, build: B) -> BankResult<(RecordIndex, R)>
    where
        C: FnMut(&R) -> BankResult<()>,
        B: FnOnce(i64) -> BankResult<R>,
    {
        self.append_inner(Some(check), build)
    }

    fn append_inner<C, B>(&self, check: Option<C>, build: B) -> BankResult<(RecordIndex, R)>
    where
        C: FnMut(&R) -> BankResult<()>,
        B: FnOnce(i64) -> BankResult<R>,
    {
        let _guard = self.locks.lock(LockScope::WholeFile, LockMode::Exclusive);
        let mut file = self.open_write()?;
        let count = self.complete_records(&file)?;

        if let Some(mut check) = check {
            file.seek(SeekFrom::Start(0))?;
            let mut reader = BufReader::new(&file);
            let mut buf = vec![0u8; R::SIZE];
            for _ in 0..count {
                reader.read_exact(&mut buf)?;
                check(&R::decode(&buf)?)?;
            }
        }

        let next_id = sequence::next_id::<R>(&mut file, count)?;
        let record = build(next_id)?;
        self.write_record(&mut file, count, &record)?;
        Ok((count, record))
    }

    /// Next id an append would allocate (observation only; not reserved)
    pub fn peek_next_id(&self) -> BankResult<i64> {
        let _guard = self.locks.lock(LockScope::WholeFile, LockMode::Shared);
        match self.open_read()? {
            Some(mut file) => {
                let count = self.complete_records(&file)?;
                sequence::next_id::<R>(&mut file, count)
            }
            None => Ok(1),
        }
    }

    // ============================================================
    // Single-record operations
    // ============================================================

    pub fn read_at(&self, index: RecordIndex) -> BankResult<R> {
        let _guard = self.locks.lock(LockScope::Record(index), LockMode::Shared);
        self.read_unlocked(index)
    }

    /// Overwrite an existing record in place
    pub fn write_at(&self, index: RecordIndex, record: &R) -> BankResult<()> {
        let _guard = self.locks.lock(LockScope::Record(index), LockMode::Exclusive);
        self.write_unlocked(index, record)
    }

    /// Read-modify-write under one exclusive record lock. Nothing is written
    /// when `f` fails.
    pub fn update_at<T, F>(&self, index: RecordIndex, f: F) -> BankResult<T>
    where
        F: FnOnce(&mut R) -> BankResult<T>,
    {
        let _guard = self.locks.lock(LockScope::Record(index), LockMode::Exclusive);
        let mut record = self.read_unlocked(index)?;
        let out = f(&mut record)?;
        self.write_unlocked(index, &record)?;
        Ok(out)
    }

    pub fn lock_record(&self, index: RecordIndex, mode: LockMode) -> LockGuard<'_> {
        self.locks.lock(LockScope::Record(index), mode)
    }

    /// Lock several records in ascending index order
    pub fn lock_records_ordered(
        &self,
        indexes: &[RecordIndex],
        mode: LockMode,
    ) -> BankResult<Vec<LockGuard<'_>>> {
        self.locks.lock_records_ordered(indexes, mode)
    }

    /// Read the record `guard` covers
    pub fn read_locked(&self, guard: &LockGuard<'_>) -> BankResult<R> {
        let index = self.guarded_index(guard)?;
        self.read_unlocked(index)
    }

    /// Write the record `guard` covers; the guard must be exclusive
    pub fn write_locked(&self, guard: &LockGuard<'_>, record: &R) -> BankResult<()> {
        let index = self.guarded_index(guard)?;
        if guard.mode() != LockMode::Exclusive {
            return Err(BankError::Conflict(format!(
                "write to {} record {} under a shared lock",
                R::TABLE,
                index
            )));
        }
        self.write_unlocked(index, record)
    }

    fn guarded_index(&self, guard: &LockGuard<'_>) -> BankResult<RecordIndex> {
        match guard.scope() {
            LockScope::Record(index) if guard.belongs_to(&self.locks) => Ok(index),
            _ => Err(BankError::Conflict(format!(
                "lock guard does not cover a {} record",
                R::TABLE
            ))),
        }
    }

    // ============================================================
    // File access (caller holds the lock)
    // ============================================================

    fn open_read(&self) -> BankResult<Option<File>> {
        match File::open(&self.path) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn open_write(&self) -> BankResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?)
    }

    fn complete_records(&self, file: &File) -> BankResult<u64> {
        let len = file.metadata()?.len();
        let size = R::SIZE as u64;
        if len % size != 0 {
            tracing::debug!(
                table = R::TABLE,
                torn_bytes = len % size,
                "Ignoring partial record at end of file"
            );
        }
        Ok(len / size)
    }

    fn read_unlocked(&self, index: RecordIndex) -> BankResult<R> {
        let not_found = || BankError::NotFound(format!("{} record {}", R::TABLE, index));
        let mut file = self.open_read()?.ok_or_else(not_found)?;
        if index >= self.complete_records(&file)? {
            return Err(not_found());
        }
        read_record(&mut file, index)
    }

    fn write_unlocked(&self, index: RecordIndex, record: &R) -> BankResult<()> {
        let mut file = self.open_write()?;
        if index >= self.complete_records(&file)? {
            return Err(BankError::NotFound(format!(
                "{} record {}",
                R::TABLE,
                index
            )));
        }
        self.write_record(&mut file, index, record)
    }

    fn write_record(&self, file: &mut File, index: RecordIndex, record: &R) -> BankResult<()> {
        #[cfg(test)]
        self.injected_fault(index)?;
        let mut buf = vec![0u8; R::SIZE];
        record.encode(&mut buf)?;
        file.seek(SeekFrom::Start(index * R::SIZE as u64))?;
        file.write_all(&buf)?;
        if self.sync_writes {
            file.sync_data()?;
        }
        Ok(())
    }
}

#[cfg(test)]
impl<R: Record> RecordStore<R> {
    /// Make the next write to `index` fail with an I/O error, once
    pub(crate) fn fail_next_write_at(&self, index: RecordIndex) {
        *self.fail_next_write.lock().unwrap() = Some(index);
    }

    fn injected_fault(&self, index: RecordIndex) -> BankResult<()> {
        let mut slot = self.fail_next_write.lock().unwrap();
        if *slot == Some(index) {
            *slot = None;
            return Err(BankError::IoFailure(format!(
                "injected write failure at {} record {}",
                R::TABLE,
                index
            )));
        }
        Ok(())
    }
}

fn read_record<R: Record>(file: &mut File, index: RecordIndex) -> BankResult<R> {
    let mut buf = vec![0u8; R::SIZE];
    file.seek(SeekFrom::Start(index * R::SIZE as u64))?;
    file.read_exact(&mut buf)?;
    R::decode(&buf)
}
