//! Locking primitives.
//!
//! - [`PathLocks`]: in-process, per-path async mutexes that serialize
//!   recovery of a single path.
//! - [`StorageLock`]: cross-process advisory lock on the storage area,
//!   held while appending to the snapshot log.

mod path_locks;
mod storage_lock;

pub use path_locks::PathLocks;
pub use storage_lock::{StorageLock, StorageLockGuard};
