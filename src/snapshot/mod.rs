//! Point-in-time captures of the observed structure under the safe root.
//!
//! A snapshot records every directory and regular file (relative path, kind,
//! and content digest for files). Snapshots are never edited: each capture
//! appends a new record to the hash-chained log. Recovery reads the latest
//! one as its "last known good" reference.

mod blobs;
mod log;
mod scheduler;

pub use blobs::{BLOB_DIRNAME, BlobStore};
pub use log::{GENESIS_HASH, SNAPSHOT_LOG_FILENAME, SnapshotLog, SnapshotLogRecord};
pub use scheduler::SnapshotSchedule;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::concurrency::StorageLock;
use crate::config::LimitsConfig;
use crate::digest;
use crate::error::{GovernanceError, Result};
use crate::events::{EventBus, EventType, GovernanceEvent};
use crate::fs_guard;
use crate::ids::{IdProvider, MonotonicIdProvider};
use crate::metrics::MetricsRegistry;
use crate::resolver::{SafePathResolver, path_key};
use crate::structure::StructureKind;

pub const STORAGE_LOCK_FILENAME: &str = "storage.lock";

/// Snapshots kept in memory; older ones remain in the log.
const MAX_RETAINED_SNAPSHOTS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    pub path: String,
    pub kind: StructureKind,
    /// Content digest for files; `None` for directories and oversized files.
    pub digest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureSnapshot {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<SnapshotEntry>,
}

impl StructureSnapshot {
    /// Entry recorded for a root-relative path key.
    pub fn entry(&self, path: &str) -> Option<&SnapshotEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    pub fn files(&self) -> impl Iterator<Item = &SnapshotEntry> {
        self.entries
            .iter()
            .filter(|e| e.kind == StructureKind::File)
    }
}

struct Storage {
    dir: PathBuf,
    log: SnapshotLog,
    lock: StorageLock,
}

/// Captures and retains structure snapshots for one safe root.
pub struct SnapshotManager {
    resolver: SafePathResolver,
    limits: LimitsConfig,
    ids: Arc<dyn IdProvider>,
    events: EventBus,
    metrics: Arc<MetricsRegistry>,
    blobs: BlobStore,
    storage: Option<Storage>,
    history: RwLock<Vec<Arc<StructureSnapshot>>>,
    /// One capture at a time, so blob pruning never races a walk.
    capture: Mutex<()>,
}

impl std::fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotManager")
            .field("root", &self.resolver.root())
            .field("storage", &self.storage.as_ref().map(|s| &s.dir))
            .finish_non_exhaustive()
    }
}

impl SnapshotManager {
    /// In-memory manager: no log, blobs kept in process.
    pub fn new(resolver: SafePathResolver, limits: LimitsConfig) -> Self {
        Self {
            resolver,
            limits,
            ids: Arc::new(MonotonicIdProvider::new()),
            events: EventBus::new(),
            metrics: Arc::new(MetricsRegistry::new()),
            blobs: BlobStore::memory(),
            storage: None,
            history: RwLock::new(Vec::new()),
            capture: Mutex::new(()),
        }
    }

    /// Persist snapshots and blobs under `dir`, reloading earlier history.
    pub fn with_storage(mut self, dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let dir = dir.canonicalize()?;

        let log = SnapshotLog::in_dir(&dir);
        let previous = log.recent_snapshots(MAX_RETAINED_SNAPSHOTS)?;
        if !previous.is_empty() {
            debug!(
                "Reloaded {} snapshots from {}",
                previous.len(),
                log.path().display()
            );
        }

        self.blobs = BlobStore::disk(dir.join(BLOB_DIRNAME));
        self.history = RwLock::new(previous.into_iter().map(Arc::new).collect());
        self.storage = Some(Storage {
            lock: StorageLock::new(dir.join(STORAGE_LOCK_FILENAME))?,
            log,
            dir,
        });
        Ok(self)
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdProvider>) -> Self {
        self.ids = ids;
        self
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn log(&self) -> Option<&SnapshotLog> {
        self.storage.as_ref().map(|s| &s.log)
    }

    /// Walk the safe root and record a new snapshot.
    ///
    /// Blocking; async callers run it on the blocking pool.
    pub fn create_snapshot(&self) -> Result<Arc<StructureSnapshot>> {
        let _capture = self.capture.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = self.walk()?;
        let snapshot = StructureSnapshot {
            id: self.ids.next_id("snap"),
            created_at: Utc::now(),
            entries,
        };

        if let Some(storage) = &self.storage {
            let _guard = storage.lock.acquire()?;
            storage.log.append(&snapshot)?;
        }

        let snapshot = Arc::new(snapshot);
        {
            let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
            history.push(Arc::clone(&snapshot));
            if history.len() > MAX_RETAINED_SNAPSHOTS {
                history.remove(0);
                let referenced: HashSet<&str> = history
                    .iter()
                    .flat_map(|s| s.files())
                    .filter_map(|e| e.digest.as_deref())
                    .collect();
                let dropped = self.blobs.retain_referenced(&referenced);
                if dropped > 0 {
                    debug!(
                        "Dropped {} unreferenced blobs ({} kept)",
                        dropped,
                        self.blobs.len()
                    );
                }
            }
        }

        self.metrics.record_snapshot();
        info!(
            "Created snapshot {} ({} entries)",
            snapshot.id,
            snapshot.entries.len()
        );
        self.events.emit(
            GovernanceEvent::new(EventType::SnapshotCreated, snapshot.id.clone())
                .with_detail(format!("{} entries", snapshot.entries.len())),
        );
        Ok(snapshot)
    }

    pub fn latest_snapshot(&self) -> Option<Arc<StructureSnapshot>> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    /// Retained snapshots, oldest first.
    pub fn snapshots(&self) -> Vec<Arc<StructureSnapshot>> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Latest recorded entry for a root-relative path key.
    pub fn latest_entry(&self, path: &str) -> Option<SnapshotEntry> {
        self.latest_snapshot()?.entry(path).cloned()
    }

    /// Stored content for a file entry, if it was captured and is intact.
    pub fn restore_content(&self, entry: &SnapshotEntry) -> Option<Vec<u8>> {
        if entry.kind != StructureKind::File {
            return None;
        }
        let digest = entry.digest.as_deref()?;
        self.blobs.get(digest, self.limits.max_blob_bytes)
    }

    fn walk(&self) -> Result<Vec<SnapshotEntry>> {
        let root = self.resolver.root();
        let storage_dir = self.storage.as_ref().map(|s| s.dir.as_path());
        let mut entries = Vec::new();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| storage_dir != Some(e.path()));

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Skipping unreadable entry during snapshot: {}", e);
                    continue;
                }
            };
            if entries.len() >= self.limits.max_snapshot_entries {
                warn!(
                    "Snapshot truncated at {} entries",
                    self.limits.max_snapshot_entries
                );
                break;
            }

            let file_type = entry.file_type();
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let path = path_key(relative);

            if file_type.is_dir() {
                entries.push(SnapshotEntry {
                    path,
                    kind: StructureKind::Directory,
                    digest: None,
                });
            } else if file_type.is_file() {
                match self.capture_file(entry.path()) {
                    Ok(digest) => entries.push(SnapshotEntry {
                        path,
                        kind: StructureKind::File,
                        digest,
                    }),
                    Err(e) => warn!("Skipping {} in snapshot: {}", entry.path().display(), e),
                }
            }
            // Symlinks and special files are not part of governed structure.
        }
        Ok(entries)
    }

    /// Digest a file, keeping its content when it is small enough to restore.
    fn capture_file(&self, path: &Path) -> Result<Option<String>> {
        match fs_guard::read_validated(path, self.limits.max_blob_bytes) {
            Ok(data) => return self.blobs.put(&data).map(Some),
            Err(GovernanceError::TooLarge { .. }) => {}
            Err(e) => return Err(e),
        }
        match digest::sha256_file(path, self.limits.max_file_bytes) {
            Ok((digest, _)) => Ok(Some(digest)),
            Err(GovernanceError::TooLarge { size, .. }) => {
                debug!("Not digesting {} ({} bytes)", path.display(), size);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct SequentialIds(AtomicU64);

    impl IdProvider for SequentialIds {
        fn next_id(&self, prefix: &str) -> String {
            format!("{prefix}_{}", self.0.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn setup() -> (tempfile::TempDir, SafePathResolver) {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(root.join("reports/2025")).unwrap();
        fs::write(root.join("reports/summary.md"), "# Summary\n").unwrap();
        let resolver = SafePathResolver::new(&root).unwrap();
        (tmp, resolver)
    }

    #[test]
    fn captures_directories_and_file_digests() {
        let (_tmp, resolver) = setup();
        let manager = SnapshotManager::new(resolver, LimitsConfig::default());

        let snapshot = manager.create_snapshot().unwrap();
        let dir = snapshot.entry("reports/2025").unwrap();
        assert_eq!(dir.kind, StructureKind::Directory);
        assert!(dir.digest.is_none());

        let file = snapshot.entry("reports/summary.md").unwrap();
        assert_eq!(file.kind, StructureKind::File);
        assert_eq!(
            file.digest.as_deref(),
            Some(digest::sha256_bytes(b"# Summary\n").as_str())
        );
        assert_eq!(manager.restore_content(file).unwrap(), b"# Summary\n");
    }

    #[test]
    fn snapshots_are_additive() {
        let (_tmp, resolver) = setup();
        let root = resolver.root().to_path_buf();
        let manager = SnapshotManager::new(resolver, LimitsConfig::default())
            .with_ids(Arc::new(SequentialIds(AtomicU64::new(1))));

        let first = manager.create_snapshot().unwrap();
        fs::write(root.join("new.txt"), "x").unwrap();
        let second = manager.create_snapshot().unwrap();

        assert_eq!(first.id, "snap_1");
        assert_eq!(second.id, "snap_2");
        assert!(first.entry("new.txt").is_none());
        assert!(second.entry("new.txt").is_some());
        assert_eq!(manager.latest_snapshot().unwrap().id, "snap_2");
        assert_eq!(manager.snapshots().len(), 2);
        assert_eq!(manager.metrics().snapshot().snapshots_created, 2);
    }

    #[test]
    fn emits_snapshot_created() {
        let (_tmp, resolver) = setup();
        let events = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = events.subscribe(EventType::SnapshotCreated, move |e| {
            sink.lock().unwrap().push(e.path.clone());
        });

        let manager = SnapshotManager::new(resolver, LimitsConfig::default()).with_events(events);
        let snapshot = manager.create_snapshot().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![snapshot.id.clone()]);
    }

    #[test]
    fn oversized_files_have_digest_but_no_blob() {
        let (_tmp, resolver) = setup();
        fs::write(resolver.root().join("big.bin"), vec![7u8; 64]).unwrap();
        let limits = LimitsConfig {
            max_blob_bytes: 16,
            ..LimitsConfig::default()
        };
        let manager = SnapshotManager::new(resolver, limits);

        let snapshot = manager.create_snapshot().unwrap();
        let entry = snapshot.entry("big.bin").unwrap();
        assert_eq!(
            entry.digest.as_deref(),
            Some(digest::sha256_bytes(&[7u8; 64]).as_str())
        );
        assert!(manager.restore_content(entry).is_none());
    }

    #[test]
    fn in_memory_blobs_follow_retained_history() {
        let (_tmp, resolver) = setup();
        let root = resolver.root().to_path_buf();
        let manager = SnapshotManager::new(resolver, LimitsConfig::default());

        for i in 0..200 {
            fs::write(root.join("reports/summary.md"), format!("revision {i}\n")).unwrap();
            manager.create_snapshot().unwrap();
        }

        let history = manager.snapshots();
        assert_eq!(history.len(), MAX_RETAINED_SNAPSHOTS);
        assert_eq!(manager.blobs.len(), MAX_RETAINED_SNAPSHOTS);

        let oldest = history[0].entry("reports/summary.md").unwrap();
        assert_eq!(
            manager.restore_content(oldest).unwrap(),
            b"revision 136\n".to_vec()
        );
        let latest = manager.latest_entry("reports/summary.md").unwrap();
        assert_eq!(
            manager.restore_content(&latest).unwrap(),
            b"revision 199\n".to_vec()
        );
    }

    #[test]
    fn reload_keeps_only_recent_history() {
        let (tmp, resolver) = setup();
        let storage = tmp.path().join("state");
        let manager = SnapshotManager::new(resolver.clone(), LimitsConfig::default())
            .with_ids(Arc::new(SequentialIds(AtomicU64::new(1))))
            .with_storage(&storage)
            .unwrap();
        for _ in 0..MAX_RETAINED_SNAPSHOTS + 6 {
            manager.create_snapshot().unwrap();
        }

        let reopened = SnapshotManager::new(resolver, LimitsConfig::default())
            .with_storage(&storage)
            .unwrap();
        let history = reopened.snapshots();
        assert_eq!(history.len(), MAX_RETAINED_SNAPSHOTS);
        assert_eq!(history[0].id, "snap_7");
        assert_eq!(
            reopened.latest_snapshot().unwrap().id,
            format!("snap_{}", MAX_RETAINED_SNAPSHOTS + 6)
        );
    }

    #[test]
    fn entry_limit_truncates() {
        let (_tmp, resolver) = setup();
        let limits = LimitsConfig {
            max_snapshot_entries: 2,
            ..LimitsConfig::default()
        };
        let manager = SnapshotManager::new(resolver, limits);
        assert_eq!(manager.create_snapshot().unwrap().entries.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_skipped() {
        let (_tmp, resolver) = setup();
        std::os::unix::fs::symlink("/etc", resolver.root().join("etc-link")).unwrap();
        let manager = SnapshotManager::new(resolver, LimitsConfig::default());
        assert!(manager.create_snapshot().unwrap().entry("etc-link").is_none());
    }

    #[test]
    fn storage_persists_and_reloads_history() {
        let (tmp, resolver) = setup();
        let storage = tmp.path().join("state");

        let manager = SnapshotManager::new(resolver.clone(), LimitsConfig::default())
            .with_storage(&storage)
            .unwrap();
        let created = manager.create_snapshot().unwrap();
        assert!(storage.join(SNAPSHOT_LOG_FILENAME).is_file());
        assert!(manager.log().unwrap().verify_chain().unwrap().is_empty());

        let reopened = SnapshotManager::new(resolver, LimitsConfig::default())
            .with_storage(&storage)
            .unwrap();
        let latest = reopened.latest_snapshot().unwrap();
        assert_eq!(latest.id, created.id);

        let file = latest.entry("reports/summary.md").unwrap();
        assert_eq!(reopened.restore_content(file).unwrap(), b"# Summary\n");
    }

    #[test]
    fn storage_inside_root_is_not_captured() {
        let (_tmp, resolver) = setup();
        let storage = resolver.root().join(".govguard");
        let manager = SnapshotManager::new(resolver, LimitsConfig::default())
            .with_storage(&storage)
            .unwrap();

        manager.create_snapshot().unwrap();
        let second = manager.create_snapshot().unwrap();
        assert!(
            second
                .entries
                .iter()
                .all(|e| !e.path.starts_with(".govguard"))
        );
    }
}
