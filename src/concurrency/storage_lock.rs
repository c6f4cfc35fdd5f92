//! Cross-process lock on the governance storage area (fs2 flock).
//!
//! Serializes snapshot log appends between processes sharing one storage
//! directory (a `watch` loop and ad-hoc `snapshot create` calls, say), so
//! the hash chain never forks.

use fs2::FileExt;
use std::fs::{self, File};
use std::path::PathBuf;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct StorageLock {
    path: PathBuf,
}

/// Releases the lock on drop.
pub struct StorageLockGuard {
    file: File,
}

impl Drop for StorageLockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl StorageLock {
    /// Lock backed by the file at `path`; parent directories are created.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Block until the lock is held.
    pub fn acquire(&self) -> Result<StorageLockGuard> {
        let file = File::create(&self.path)?;
        file.lock_exclusive()?;
        Ok(StorageLockGuard { file })
    }
}
