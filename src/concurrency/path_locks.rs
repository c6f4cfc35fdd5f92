//! Per-path async mutex map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per canonical path key.
///
/// Entries nobody holds or waits on are pruned on each `lock` call so the
/// map stays proportional to the number of paths under active recovery.
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`. Released when the guard drops.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|k, m| k == key || Arc::strong_count(m) > 1);
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        mutex.lock_owned().await
    }

    /// Number of tracked keys (held, awaited, or not yet pruned).
    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = PathLocks::new();
        let guard = locks.lock("reports/2025").await;
        assert!(
            tokio::time::timeout(SHORT, locks.lock("reports/2025"))
                .await
                .is_err()
        );
        drop(guard);
        assert!(
            tokio::time::timeout(SHORT, locks.lock("reports/2025"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn different_keys_are_independent() {
        let locks = PathLocks::new();
        let _a = locks.lock("a").await;
        assert!(tokio::time::timeout(SHORT, locks.lock("b")).await.is_ok());
    }

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let locks = PathLocks::new();
        for i in 0..10 {
            let _g = locks.lock(&format!("path-{i}")).await;
        }
        let _g = locks.lock("last").await;
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_tasks_serialize() {
        let locks = Arc::new(PathLocks::new());
        let inside = Arc::new(AtomicU32::new(0));
        let max_inside = Arc::new(AtomicU32::new(0));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                tokio::spawn(async move {
                    let _g = locks.lock("shared").await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }
}
