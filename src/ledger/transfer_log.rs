//! Transfer WAL
//!
//! Append-only log of transfer intents and outcomes. Every entry is fsynced
//! before the call returns and is never rewritten.
//!
//! # Entry Layout (32 bytes)
//!
//! ```text
//! ┌───────────┬──────────┬──────────────────────────────────────────┐
//! │ payload   │ 24 bytes │ bincode {transfer_id, from, to, amount}  │
//! │ status    │ 1 byte   │ Start/Commit/Debited/Aborted/Recovered   │
//! │ padding   │ 3 bytes  │ zero                                     │
//! │ checksum  │ 4 bytes  │ CRC32 of bytes 0..28                     │
//! └───────────┴──────────┴──────────────────────────────────────────┘
//! ```

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use crate::core_types::{AccountId, TransferId};
use crate::error::{BankError, BankResult};
use crate::storage::{Record, RecordStore};

// ============================================================
// CONSTANTS
// ============================================================

pub const WAL_ENTRY_SIZE: usize = 32;
const PAYLOAD_SIZE: usize = 24;
const STATUS_OFFSET: usize = 24;
const CHECKSUM_OFFSET: usize = 28;

/// CRC32 over `data`
fn crc32_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

// ============================================================
// STATUS
// ============================================================

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Intent logged; no balance touched yet
    Start = 1,
    /// Both balance writes landed
    Commit = 2,
    /// Sender debit landed; credit not yet confirmed
    Debited = 3,
    /// Re-validation under lock failed; no balance moved
    Aborted = 4,
    /// Resolved by startup recovery
    Recovered = 5,
}

impl TransferStatus {
    /// True for statuses that close a START
    pub fn is_resolving(&self) -> bool {
        matches!(
            self,
            TransferStatus::Commit | TransferStatus::Aborted | TransferStatus::Recovered
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Start => "START",
            TransferStatus::Commit => "COMMIT",
            TransferStatus::Debited => "DEBITED",
            TransferStatus::Aborted => "ABORTED",
            TransferStatus::Recovered => "RECOVERED",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for TransferStatus {
    type Error = BankError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Start),
            2 => Ok(Self::Commit),
            3 => Ok(Self::Debited),
            4 => Ok(Self::Aborted),
            5 => Ok(Self::Recovered),
            _ => Err(BankError::corrupt(
                TransferLogEntry::TABLE,
                format!("unknown transfer status {}", value),
            )),
        }
    }
}

// ============================================================
// ENTRY
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct TransferPayload {
    transfer_id: i64,
    from: i32,
    to: i32,
    amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferLogEntry {
    pub transfer_id: TransferId,
    pub from_account: AccountId,
    pub to_account: AccountId,
    pub amount: f64,
    pub status: TransferStatus,
}

impl TransferLogEntry {
    /// Same transfer, another status
    pub fn with_status(&self, status: TransferStatus) -> Self {
        Self { status, ..*self }
    }
}

impl Record for TransferLogEntry {
    const TABLE: &'static str = "transfers";
    const SIZE: usize = WAL_ENTRY_SIZE;

    fn id(&self) -> i64 {
        self.transfer_id
    }

    fn encode(&self, out: &mut [u8]) -> BankResult<()> {
        let payload = bincode::serialize(&TransferPayload {
            transfer_id: self.transfer_id,
            from: self.from_account,
            to: self.to_account,
            amount: self.amount,
        })
        .map_err(|e| BankError::IoFailure(format!("encode transfer entry: {}", e)))?;
        debug_assert_eq!(payload.len(), PAYLOAD_SIZE);

        out.fill(0);
        out[..PAYLOAD_SIZE].copy_from_slice(&payload);
        out[STATUS_OFFSET] = self.status as u8;
        let checksum = crc32_checksum(&out[..CHECKSUM_OFFSET]);
        out[CHECKSUM_OFFSET..WAL_ENTRY_SIZE].copy_from_slice(&checksum.to_le_bytes());
        Ok(())
    }

    fn decode(buf: &[u8]) -> BankResult<Self> {
        let mut stored = [0u8; 4];
        stored.copy_from_slice(&buf[CHECKSUM_OFFSET..WAL_ENTRY_SIZE]);
        if u32::from_le_bytes(stored) != crc32_checksum(&buf[..CHECKSUM_OFFSET]) {
            return Err(BankError::corrupt(Self::TABLE, "checksum mismatch"));
        }

        let payload: TransferPayload = bincode::deserialize(&buf[..PAYLOAD_SIZE])
            .map_err(|e| BankError::corrupt(Self::TABLE, e))?;
        Ok(Self {
            transfer_id: payload.transfer_id,
            from_account: payload.from,
            to_account: payload.to,
            amount: payload.amount,
            status: TransferStatus::try_from(buf[STATUS_OFFSET])?,
        })
    }
}

// ============================================================
// LEDGER
// ============================================================

/// Durable transfer log
///
/// Resolving entries carry old transfer ids, so the last entry does not
/// bound the id space. The ledger keeps the high-water mark, seeded by a
/// scan at open, and allocates under it together with the START append.
#[derive(Debug)]
pub struct TransferLedger {
    store: RecordStore<TransferLogEntry>,
    next_transfer_id: Mutex<TransferId>,
}

impl TransferLedger {
    pub fn open(path: impl Into<PathBuf>) -> BankResult<Self> {
        let store: RecordStore<TransferLogEntry> = RecordStore::open(path, true);
        let mut max_id = 0;
        store.visit(|_, entry| {
            max_id = max_id.max(entry.transfer_id);
            Ok(ControlFlow::Continue(()))
        })?;

        tracing::debug!(next_transfer_id = max_id + 1, "Transfer ledger opened");
        Ok(Self {
            store,
            next_transfer_id: Mutex::new(max_id + 1),
        })
    }

    /// Allocate a transfer id and durably log the START
    pub fn begin(
        &self,
        from_account: AccountId,
        to_account: AccountId,
        amount: f64,
    ) -> BankResult<TransferLogEntry> {
        let mut next = self
            .next_transfer_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = TransferLogEntry {
            transfer_id: *next,
            from_account,
            to_account,
            amount,
            status: TransferStatus::Start,
        };
        self.store.append(&entry)?;
        // Only a logged START consumes its id.
        *next += 1;
        Ok(entry)
    }

    /// Durably log a later status of a started transfer
    pub fn mark(&self, start: &TransferLogEntry, status: TransferStatus) -> BankResult<()> {
        self.store.append(&start.with_status(status))?;
        Ok(())
    }

    /// Stream every entry in log order until `f` breaks
    pub fn replay<F>(&self, mut f: F) -> BankResult<()>
    where
        F: FnMut(TransferLogEntry) -> BankResult<ControlFlow<()>>,
    {
        self.store.visit(|_, entry| f(entry))
    }

    /// Every entry, in log order
    pub fn entries(&self) -> BankResult<Vec<TransferLogEntry>> {
        Ok(self
            .store
            .scan(|_| true)?
            .into_iter()
            .map(|(_, entry)| entry)
            .collect())
    }
}
