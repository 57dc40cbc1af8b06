//! Funds Transfer
//!
//! The atomic two-account balance movement.
//!
//! # State Machine
//!
//! ```text
//! VALIDATED → LOGGED → LOCKED → DEBITED → CREDITED → COMMITTED
//!     ↓                  ↓
//!  ABORTED            ABORTED
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Log-Before-Write**: the WAL START is fsynced before any balance changes
//! 2. **Ordered Locking**: account records are locked in ascending index order
//! 3. **Stamped Writes**: each balance write records its transfer id, so
//!    recovery can decide between refund and roll-forward
//! 4. **No Inline Retry**: a failed credit is left to startup recovery

pub mod coordinator;
pub mod state;

pub use coordinator::{TransferCoordinator, TransferReceipt, TransferRequest};
pub use state::TransferState;
