//! Periodic snapshot capture as an owned, cancellable task.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::SnapshotManager;
use crate::error::{GovernanceError, Result};
use crate::metrics::MetricsSink;

/// Handle on a running snapshot loop.
///
/// The loop stops on [`SnapshotSchedule::cancel`] or when the handle is
/// dropped, whichever comes first.
pub struct SnapshotSchedule {
    interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SnapshotSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotSchedule")
            .field("interval", &self.interval)
            .field("active", &self.is_active())
            .finish()
    }
}

impl SnapshotSchedule {
    /// Spawn the loop on the current tokio runtime. The first capture happens
    /// one `interval` from now.
    pub fn start(
        manager: Arc<SnapshotManager>,
        interval: Duration,
        sinks: Vec<Arc<dyn MetricsSink>>,
    ) -> Result<Self> {
        if interval.is_zero() {
            return Err(GovernanceError::Config(
                "snapshot interval must be greater than 0".to_string(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            GovernanceError::Config("snapshot scheduling requires a tokio runtime".to_string())
        })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = runtime.spawn(snapshot_loop(manager, interval, sinks, shutdown_rx));
        info!("Scheduled snapshots every {:?}", interval);

        Ok(Self {
            interval,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn is_active(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Stop the loop. Safe to call any number of times; returns true only
    /// for the call that actually stopped it.
    pub fn cancel(&self) -> bool {
        let _ = self.shutdown_tx.send(true);
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => {
                handle.abort();
                debug!("Snapshot schedule cancelled");
                true
            }
            None => false,
        }
    }
}

impl Drop for SnapshotSchedule {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn snapshot_loop(
    manager: Arc<SnapshotManager>,
    interval: Duration,
    sinks: Vec<Arc<dyn MetricsSink>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let worker = Arc::clone(&manager);
                match tokio::task::spawn_blocking(move || worker.create_snapshot()).await {
                    Ok(Ok(snapshot)) => debug!("Scheduled snapshot {}", snapshot.id),
                    // A failed tick never stops the schedule.
                    Ok(Err(e)) => warn!("Scheduled snapshot failed: {}", e),
                    Err(e) => warn!("Scheduled snapshot task failed: {}", e),
                }

                let metrics = manager.metrics().snapshot();
                for sink in &sinks {
                    sink.publish(&metrics);
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
            }
        }
    }
}
