//! Path validation with bounded self-healing.
//!
//! Each call walks a small state machine:
//!
//! ```text
//! resolve ──(escape)──────────────────────────────▶ FAILED (path_security)
//!    │
//!    ▼
//! check ──(present, right kind)───────────────────▶ VALID
//!    │
//!    ▼ STRUCTURE_MISSING
//! recovery off? ──────────────────────────────────▶ FAILED (recovery_disabled)
//!    │
//!    ▼
//! attempt 1..=max: inherit → fallback → verify
//!    ├─ verified via inherit / dag rebuild ───────▶ RECOVERED
//!    ├─ verified via fallback ────────────────────▶ FALLBACK
//!    └─ all attempts fail ────────────────────────▶ FAILED (recovery_exhausted)
//! ```
//!
//! Recovery of one canonical path is serialized through a per-path lock, so
//! concurrent callers never both create the same node; a caller that waited
//! re-checks and usually finds the path already valid. Each attempt runs its
//! tiers on the blocking pool and keeps the lock until it finishes, even if
//! the caller has timed out.

mod outcome;
mod strategy;

pub use outcome::{
    AttemptOutcome, FailureReason, RecoveryAttempt, StrategyKind, ValidationOutcome,
    ValidationStatus,
};
pub use strategy::{
    AttemptState, InheritStructure, RecoveryContext, RecoveryStrategy, SelfRepairVerification,
    StrategyOutcome, TransientFallback, apply_outcome, default_strategies,
};

use chrono::Utc;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::concurrency::PathLocks;
use crate::config::GovernanceConfig;
use crate::error::Result;
use crate::events::{EventBus, EventType, GovernanceEvent, Subscription};
use crate::ids::{IdProvider, MonotonicIdProvider};
use crate::metrics::{GovernanceMetrics, MetricsRegistry, MetricsSink};
use crate::resolver::{ResolvedPath, SafePathResolver};
use crate::snapshot::{SnapshotManager, SnapshotSchedule, StructureSnapshot};
use crate::structure::{StructureGraph, StructureKind, StructureNode, StructureSource};

/// Per-call options for [`PathValidator::validate_path`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidateOptions {
    /// Set to false to only report; the config flag must also allow recovery.
    pub attempt_recovery: bool,
    /// Abandon the call after this long; partial recovery is left in place.
    pub timeout: Option<Duration>,
    /// Kind to require for paths the structure graph does not declare.
    pub expected_kind: Option<StructureKind>,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            attempt_recovery: true,
            timeout: None,
            expected_kind: None,
        }
    }
}

impl ValidateOptions {
    pub fn without_recovery(mut self) -> Self {
        self.attempt_recovery = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn expecting(mut self, kind: StructureKind) -> Self {
        self.expected_kind = Some(kind);
        self
    }
}

/// Builder for [`PathValidator`].
pub struct ValidatorBuilder {
    config: GovernanceConfig,
    graph: Option<StructureGraph>,
    storage_dir: Option<std::path::PathBuf>,
    ids: Arc<dyn IdProvider>,
    sinks: Vec<Arc<dyn MetricsSink>>,
    strategies: Vec<Box<dyn RecoveryStrategy>>,
}

impl ValidatorBuilder {
    /// Declared structure, overriding `structure_file` from the config.
    pub fn structure(mut self, source: &dyn StructureSource) -> Result<Self> {
        self.graph = Some(StructureGraph::from_nodes(source.load()?)?);
        Ok(self)
    }

    pub fn graph(mut self, graph: StructureGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Persist snapshots and blobs under `dir`.
    pub fn storage_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    pub fn ids(mut self, ids: Arc<dyn IdProvider>) -> Self {
        self.ids = ids;
        self
    }

    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Replace the recovery tiers (tried in the given order).
    pub fn strategies(mut self, strategies: Vec<Box<dyn RecoveryStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Build the validator. With `enable_snapshotting` set this must run
    /// inside a tokio runtime, since it starts the snapshot schedule.
    pub fn build(self) -> Result<PathValidator> {
        self.config.validate()?;
        let resolver = SafePathResolver::new(&self.config.safe_root)?;

        let graph = match (self.graph, self.config.structure_source()) {
            (Some(graph), _) => graph,
            (None, Some(source)) => StructureGraph::from_nodes(source.load()?)?,
            (None, None) => StructureGraph::empty(),
        };

        let events = EventBus::new();
        let metrics = Arc::new(MetricsRegistry::new());
        let mut snapshots = SnapshotManager::new(resolver.clone(), self.config.limits)
            .with_events(events.clone())
            .with_metrics(Arc::clone(&metrics))
            .with_ids(self.ids);
        if let Some(dir) = &self.storage_dir {
            snapshots = snapshots.with_storage(dir)?;
        }

        info!(
            "Governing {} ({} declared nodes)",
            resolver.root().display(),
            graph.len()
        );

        let validator = PathValidator {
            core: Arc::new(Core {
                config: self.config,
                resolver,
                graph,
                snapshots: Arc::new(snapshots),
                events,
                metrics,
                strategies: self.strategies,
            }),
            locks: PathLocks::new(),
            sinks: self.sinks,
            schedule: Mutex::new(None),
        };

        if validator.core.config.enable_snapshotting {
            validator.schedule_snapshots(validator.core.config.snapshot_interval())?;
        }
        Ok(validator)
    }
}

/// Validates governed paths and heals missing structure.
pub struct PathValidator {
    core: Arc<Core>,
    locks: PathLocks,
    sinks: Vec<Arc<dyn MetricsSink>>,
    schedule: Mutex<Option<SnapshotSchedule>>,
}

/// The part of a validator that recovery attempts carry onto the blocking
/// pool.
struct Core {
    config: GovernanceConfig,
    resolver: SafePathResolver,
    graph: StructureGraph,
    snapshots: Arc<SnapshotManager>,
    events: EventBus,
    metrics: Arc<MetricsRegistry>,
    strategies: Vec<Box<dyn RecoveryStrategy>>,
}

impl Core {
    /// Run every tier once against `target`. Blocking.
    fn attempt(
        &self,
        target: &ResolvedPath,
        expected: Option<StructureKind>,
        restore_kind: StructureKind,
        attempt_number: u32,
    ) -> AttemptState {
        let key = target.key();
        let ctx = RecoveryContext {
            target,
            node: self.graph.lookup(&key),
            expected,
            restore_kind,
            attempt_number,
            dag_enabled: self.config.dag_enabled,
            resolver: &self.resolver,
            graph: &self.graph,
            snapshots: &self.snapshots,
            events: &self.events,
            metrics: &self.metrics,
        };

        let mut state = AttemptState::default();
        for tier in &self.strategies {
            let result = tier.attempt(&ctx, &state);
            apply_outcome(&mut state, tier.as_ref(), result);
        }
        state
    }
}

impl std::fmt::Debug for PathValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathValidator")
            .field("root", &self.core.resolver.root())
            .field("declared_nodes", &self.core.graph.len())
            .finish_non_exhaustive()
    }
}

/// Mutable state of one validation call that must outlive a timeout.
#[derive(Default)]
struct CallState {
    attempts: Vec<RecoveryAttempt>,
    recovering: bool,
}

/// What is expected at a path.
struct Target<'a> {
    node: Option<&'a StructureNode>,
    expected: Option<StructureKind>,
    restore_kind: StructureKind,
}

impl PathValidator {
    pub fn builder(config: GovernanceConfig) -> ValidatorBuilder {
        ValidatorBuilder {
            config,
            graph: None,
            storage_dir: None,
            ids: Arc::new(MonotonicIdProvider::new()),
            sinks: Vec::new(),
            strategies: default_strategies(),
        }
    }

    /// Validator with default collaborators.
    pub fn new(config: GovernanceConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.core.config
    }

    pub fn resolver(&self) -> &SafePathResolver {
        &self.core.resolver
    }

    pub fn root(&self) -> &Path {
        self.core.resolver.root()
    }

    pub fn graph(&self) -> &StructureGraph {
        &self.core.graph
    }

    pub fn events(&self) -> &EventBus {
        &self.core.events
    }

    pub fn snapshot_manager(&self) -> &Arc<SnapshotManager> {
        &self.core.snapshots
    }

    pub fn subscribe<F>(&self, kind: EventType, handler: F) -> Subscription
    where
        F: Fn(&GovernanceEvent) + Send + Sync + 'static,
    {
        self.core.events.subscribe(kind, handler)
    }

    pub fn metrics(&self) -> GovernanceMetrics {
        self.core.metrics.snapshot()
    }

    /// Push the current counters to every registered sink.
    pub fn publish_metrics(&self) {
        let metrics = self.core.metrics.snapshot();
        for sink in &self.sinks {
            sink.publish(&metrics);
        }
    }

    /// Capture a snapshot now. Blocking.
    pub fn create_snapshot(&self) -> Result<Arc<StructureSnapshot>> {
        self.core.snapshots.create_snapshot()
    }

    /// Start (or restart) periodic snapshots on the current runtime.
    pub fn schedule_snapshots(&self, interval: Duration) -> Result<()> {
        let schedule =
            SnapshotSchedule::start(Arc::clone(&self.core.snapshots), interval, self.sinks.clone())?;
        let previous = self
            .schedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(schedule);
        if let Some(previous) = previous {
            previous.cancel();
        }
        Ok(())
    }

    /// Stop periodic snapshots. Returns false if none were running.
    pub fn cancel_snapshots(&self) -> bool {
        let schedule = self
            .schedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        schedule.is_some_and(|s| s.cancel())
    }

    pub fn snapshots_scheduled(&self) -> bool {
        self.schedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(SnapshotSchedule::is_active)
    }

    /// Validate every declared node, parents first.
    pub async fn validate_declared(&self) -> Vec<ValidationOutcome> {
        let mut outcomes = Vec::with_capacity(self.core.graph.len());
        for node in self.core.graph.topological_order() {
            outcomes.push(self.validate_path(&node.path, ValidateOptions::default()).await);
        }
        outcomes
    }

    /// Validate `raw` and, if it is missing, try to heal it.
    ///
    /// Only the outcome reports failure; this never returns an error.
    pub async fn validate_path(&self, raw: &str, opts: ValidateOptions) -> ValidationOutcome {
        let core = &self.core;
        core.metrics.record_validation();

        let resolved = match core.resolver.resolve(raw) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("Rejected path {:?}: {}", raw, e);
                core.metrics.record_failure();
                core.events.emit(
                    GovernanceEvent::new(EventType::ValidationFailed, raw)
                        .with_detail(FailureReason::PathSecurity.to_string()),
                );
                return self.outcome(
                    raw,
                    None,
                    ValidationStatus::Failed,
                    Vec::new(),
                    Some(FailureReason::PathSecurity),
                );
            }
        };

        let mut state = CallState::default();
        let run = self.run(&resolved, opts, &mut state);
        let (status, reason) = match opts.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Validation of {} timed out after {:?}", resolved.key(), limit);
                    (ValidationStatus::Failed, Some(FailureReason::Timeout))
                }
            },
            None => run.await,
        };

        let key = resolved.key();
        match status {
            ValidationStatus::Valid => debug!("{} is valid", key),
            ValidationStatus::Recovered => {
                core.metrics.record_recovery_success();
                info!("Recovered {} after {} attempt(s)", key, state.attempts.len());
                core.events.emit(
                    GovernanceEvent::new(EventType::StructureRecovered, key.clone())
                        .with_detail(format!("{} attempt(s)", state.attempts.len())),
                );
            }
            ValidationStatus::Fallback => {
                core.metrics.record_recovery_success();
                info!("Restored {} via fallback", key);
            }
            ValidationStatus::Failed => {
                core.metrics.record_failure();
                if state.recovering {
                    core.metrics.record_recovery_failure();
                }
                let reason = reason.map(|r| r.to_string()).unwrap_or_default();
                warn!("Validation of {} failed: {}", key, reason);
                core.events.emit(
                    GovernanceEvent::new(EventType::ValidationFailed, key.clone())
                        .with_detail(reason),
                );
            }
        }

        self.outcome(
            raw,
            Some(resolved.absolute().to_path_buf()),
            status,
            state.attempts,
            reason,
        )
    }

    fn outcome(
        &self,
        raw: &str,
        resolved: Option<std::path::PathBuf>,
        status: ValidationStatus,
        attempts: Vec<RecoveryAttempt>,
        reason: Option<FailureReason>,
    ) -> ValidationOutcome {
        ValidationOutcome::new(
            raw,
            self.core.resolver.root().to_path_buf(),
            resolved,
            status,
            attempts,
            reason,
        )
    }

    fn target_for(&self, key: &str, opts: ValidateOptions) -> Target<'_> {
        let node = self.core.graph.lookup(key);
        let expected = node.map(|n| n.kind).or(opts.expected_kind);
        let restore_kind = expected
            .or_else(|| self.core.snapshots.latest_entry(key).map(|e| e.kind))
            .unwrap_or_else(|| StructureKind::infer(Path::new(key)));
        Target {
            node,
            expected,
            restore_kind,
        }
    }

    async fn run(
        &self,
        resolved: &ResolvedPath,
        opts: ValidateOptions,
        state: &mut CallState,
    ) -> (ValidationStatus, Option<FailureReason>) {
        let key = resolved.key();
        // Shared with each blocking attempt, so an attempt abandoned by a
        // timeout still holds the path until it returns.
        let guard = Arc::new(self.locks.lock(&key).await);

        let target = self.target_for(&key, opts);
        if strategy::is_satisfied(resolved.absolute(), target.expected) {
            return (ValidationStatus::Valid, None);
        }

        self.core
            .events
            .emit(GovernanceEvent::new(EventType::StructureMissing, key.clone()));

        if !(self.core.config.enable_auto_recovery && opts.attempt_recovery) {
            return (
                ValidationStatus::Failed,
                Some(FailureReason::RecoveryDisabled),
            );
        }

        state.recovering = true;
        let node_id = target
            .node
            .map(|n| n.id.clone())
            .unwrap_or_else(|| key.clone());

        for attempt_number in 1..=self.core.config.max_recovery_attempts {
            let core = Arc::clone(&self.core);
            let held = Arc::clone(&guard);
            let path = resolved.clone();
            let (expected, restore_kind) = (target.expected, target.restore_kind);
            let attempt = tokio::task::spawn_blocking(move || {
                let _held = held;
                core.attempt(&path, expected, restore_kind, attempt_number)
            })
            .await
            .unwrap_or_else(|e| {
                warn!("Recovery attempt {} for {} aborted: {}", attempt_number, key, e);
                AttemptState {
                    detail: Some(format!("attempt aborted: {}", e)),
                    ..AttemptState::default()
                }
            });

            let strategy = attempt.strategy();
            debug!(
                "Recovery attempt {} for {} via {}: {}",
                attempt_number,
                key,
                strategy,
                if attempt.verified { "verified" } else { "failed" }
            );
            state.attempts.push(RecoveryAttempt {
                node_id: node_id.clone(),
                attempt_number,
                strategy,
                outcome: if attempt.verified {
                    AttemptOutcome::Success
                } else {
                    AttemptOutcome::Failure
                },
                timestamp: Utc::now(),
                detail: attempt.detail.clone(),
            });

            if attempt.verified {
                let status = match strategy {
                    StrategyKind::InheritStructure | StrategyKind::DagRebuild => {
                        ValidationStatus::Recovered
                    }
                    StrategyKind::TransientFallback => ValidationStatus::Fallback,
                };
                return (status, None);
            }
        }

        (
            ValidationStatus::Failed,
            Some(FailureReason::RecoveryExhausted),
        )
    }
}

impl Drop for PathValidator {
    fn drop(&mut self) {
        self.cancel_snapshots();
    }
}
