//! Content-addressed storage for snapshot file contents.
//!
//! Blobs are keyed by their `sha256:` digest and re-hashed on every read; a
//! blob whose content no longer matches its name is discarded.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

use crate::digest::{digest_hex, sha256_bytes};
use crate::error::Result;
use crate::fs_guard;

pub const BLOB_DIRNAME: &str = "blobs";

#[derive(Debug)]
pub enum BlobStore {
    /// `<dir>/sha256/<hex>` on disk.
    Disk(PathBuf),
    /// Process-local, used when no storage area is configured.
    Memory(Mutex<HashMap<String, Vec<u8>>>),
}

impl Default for BlobStore {
    fn default() -> Self {
        Self::Memory(Mutex::new(HashMap::new()))
    }
}

impl BlobStore {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn disk(dir: impl Into<PathBuf>) -> Self {
        Self::Disk(dir.into())
    }

    fn blob_path(dir: &Path, hex: &str) -> PathBuf {
        dir.join("sha256").join(hex)
    }

    /// Store `data`, returning its digest. Storing existing content is a no-op.
    pub fn put(&self, data: &[u8]) -> Result<String> {
        let digest = sha256_bytes(data);
        match self {
            Self::Disk(dir) => {
                let Some(hex) = digest_hex(&digest) else {
                    return Ok(digest);
                };
                let path = Self::blob_path(dir, hex);
                if !path.exists() {
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    // Write-then-rename so readers never see a partial blob.
                    let tmp = path.with_extension("tmp");
                    fs::write(&tmp, data)?;
                    fs::rename(&tmp, &path)?;
                }
            }
            Self::Memory(map) => {
                map.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entry(digest.clone())
                    .or_insert_with(|| data.to_vec());
            }
        }
        Ok(digest)
    }

    /// Forget in-memory blobs whose digest is not in `referenced`, returning
    /// how many were dropped. Disk blobs stay: older log records name them.
    pub fn retain_referenced(&self, referenced: &HashSet<&str>) -> usize {
        match self {
            Self::Disk(_) => 0,
            Self::Memory(map) => {
                let mut map = map.lock().unwrap_or_else(PoisonError::into_inner);
                let before = map.len();
                map.retain(|digest, _| referenced.contains(digest.as_str()));
                before - map.len()
            }
        }
    }

    /// Number of stored blobs.
    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Disk(dir) => fs::read_dir(dir.join("sha256"))
                .map(|entries| {
                    entries
                        .filter_map(|e| e.ok())
                        .filter(|e| e.path().extension().is_none())
                        .count()
                })
                .unwrap_or(0),
            Self::Memory(map) => map.lock().unwrap_or_else(PoisonError::into_inner).len(),
        }
    }

    /// Content for `digest`, if present and intact.
    pub fn get(&self, digest: &str, max_bytes: u64) -> Option<Vec<u8>> {
        let data = match self {
            Self::Disk(dir) => {
                let path = Self::blob_path(dir, digest_hex(digest)?);
                if !path.exists() {
                    return None;
                }
                match fs_guard::read_validated(&path, max_bytes) {
                    Ok(data) => data,
                    Err(e) => {
                        warn!("Failed to read blob {}: {}", path.display(), e);
                        return None;
                    }
                }
            }
            Self::Memory(map) => map
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(digest)
                .cloned()?,
        };

        if sha256_bytes(&data) != digest {
            warn!("Blob {} failed verification; discarding", digest);
            if let Self::Disk(dir) = self
                && let Some(hex) = digest_hex(digest)
            {
                let _ = fs::remove_file(Self::blob_path(dir, hex));
            }
            return None;
        }
        Some(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = BlobStore::memory();
        let digest = store.put(b"quarterly numbers").unwrap();
        assert_eq!(store.get(&digest, 1024).unwrap(), b"quarterly numbers");
        assert!(store.get(&sha256_bytes(b"other"), 1024).is_none());
    }

    #[test]
    fn memory_store_drops_unreferenced_blobs() {
        let store = BlobStore::memory();
        let kept = store.put(b"kept").unwrap();
        store.put(b"stale").unwrap();
        assert_eq!(store.len(), 2);

        let referenced: HashSet<&str> = [kept.as_str()].into_iter().collect();
        assert_eq!(store.retain_referenced(&referenced), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&kept, 1024).unwrap(), b"kept");
    }

    #[test]
    fn disk_store_is_not_pruned() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BlobStore::disk(tmp.path());
        store.put(b"one").unwrap();
        store.put(b"two").unwrap();
        assert_eq!(store.retain_referenced(&HashSet::new()), 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn disk_store_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BlobStore::disk(tmp.path().join(BLOB_DIRNAME));
        let digest = store.put(b"content").unwrap();

        let hex = digest_hex(&digest).unwrap();
        assert!(tmp.path().join("blobs/sha256").join(hex).is_file());
        assert_eq!(store.get(&digest, 1024).unwrap(), b"content");
    }

    #[test]
    fn tampered_blob_is_discarded() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BlobStore::disk(tmp.path());
        let digest = store.put(b"original").unwrap();

        let path = tmp.path().join("sha256").join(digest_hex(&digest).unwrap());
        fs::write(&path, b"tampered").unwrap();

        assert!(store.get(&digest, 1024).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn malformed_digest_misses() {
        let store = BlobStore::disk("/nonexistent");
        assert!(store.get("sha256:../../etc/passwd", 1024).is_none());
    }
}
