//! Record-file storage: codec, lock manager, stores and id sequences

pub mod codec;
pub mod data_dir;
pub mod lock;
pub mod record_store;
pub mod sequence;

pub use codec::{FieldReader, FieldWriter, Record};
pub use data_dir::DataDir;
pub use lock::{LockGuard, LockManager, LockMode, LockScope};
pub use record_store::RecordStore;
