//! Transfer State Definitions
//!
//! States a transfer passes through inside the coordinator. Only the WAL
//! statuses are persisted; these states drive logging and tests.

use std::fmt;

/// Transfer states
///
/// Terminal states: COMMITTED, ABORTED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    /// Request passed the pre-checks
    Validated,

    /// START is durable in the WAL
    Logged,

    /// Both account records locked
    Locked,

    /// Sender written - funds are IN-FLIGHT
    /// CRITICAL: Must reach COMMITTED, or be refunded by recovery
    Debited,

    /// Receiver written, COMMIT not yet durable
    Credited,

    /// Terminal: COMMIT is durable
    Committed,

    /// Terminal: rejected before any balance moved
    Aborted,
}

impl TransferState {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Committed | TransferState::Aborted)
    }

    /// Check if a WAL START exists without a COMMIT yet
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            TransferState::Logged
                | TransferState::Locked
                | TransferState::Debited
                | TransferState::Credited
        )
    }

    /// Legal successor states
    pub fn can_advance_to(&self, next: TransferState) -> bool {
        use TransferState::*;
        matches!(
            (self, next),
            (Validated, Logged)
                | (Validated, Aborted)
                | (Logged, Locked)
                | (Locked, Debited)
                | (Locked, Aborted)
                | (Debited, Credited)
                | (Credited, Committed)
        )
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Validated => "VALIDATED",
            TransferState::Logged => "LOGGED",
            TransferState::Locked => "LOCKED",
            TransferState::Debited => "DEBITED",
            TransferState::Credited => "CREDITED",
            TransferState::Committed => "COMMITTED",
            TransferState::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
