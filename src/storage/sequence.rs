//! Sequence allocation
//!
//! The next id of a table is one past the id of its last complete record.
//! Callers hold the store's whole-file lock; under the exclusive lock of
//! [`RecordStore::append_with`](super::RecordStore::append_with) the read and
//! the append form one span, so two creations never see the same id.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use crate::error::{BankError, BankResult};

use super::codec::Record;

/// Next id for a file holding `count` complete records
pub(crate) fn next_id<R: Record>(file: &mut File, count: u64) -> BankResult<i64> {
    if count == 0 {
        return Ok(1);
    }

    let mut buf = vec![0u8; R::SIZE];
    let offset = (count - 1) * R::SIZE as u64;
    if let Err(e) = file
        .seek(SeekFrom::Start(offset))
        .and_then(|_| file.read_exact(&mut buf))
    {
        tracing::warn!(table = R::TABLE, error = %e, "Tail read failed; sequence restarts at 1");
        return Ok(1);
    }

    R::decode(&buf)?
        .id()
        .checked_add(1)
        .ok_or_else(|| BankError::Conflict(format!("{} id space exhausted", R::TABLE)))
}
