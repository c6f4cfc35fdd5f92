//! The recovery tiers.
//!
//! Each attempt runs every strategy in order against a shared
//! [`AttemptState`]. A tier that does not apply says so and the next one
//! runs; per-tier failures are values, never errors.

use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

use super::outcome::StrategyKind;
use crate::events::{EventBus, EventType, GovernanceEvent};
use crate::metrics::MetricsRegistry;
use crate::resolver::{ResolvedPath, SafePathResolver};
use crate::snapshot::SnapshotManager;
use crate::structure::{StructureGraph, StructureKind, StructureNode};

/// Everything a tier may read or touch for one attempt.
pub struct RecoveryContext<'a> {
    pub target: &'a ResolvedPath,
    /// Declared node for the target, if any.
    pub node: Option<&'a StructureNode>,
    /// Kind the target must have; `None` means existence is enough.
    pub expected: Option<StructureKind>,
    /// Kind to create when nothing better is known.
    pub restore_kind: StructureKind,
    pub attempt_number: u32,
    pub dag_enabled: bool,
    pub resolver: &'a SafePathResolver,
    pub graph: &'a StructureGraph,
    pub snapshots: &'a SnapshotManager,
    pub events: &'a EventBus,
    pub metrics: &'a MetricsRegistry,
}

impl RecoveryContext<'_> {
    /// The existence/kind check shared by validation and verification.
    pub fn is_satisfied(&self) -> bool {
        is_satisfied(self.target.absolute(), self.expected)
    }
}

pub(crate) fn is_satisfied(path: &Path, expected: Option<StructureKind>) -> bool {
    match (StructureKind::of(path), expected) {
        (Some(actual), Some(expected)) => actual == expected,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// What the tiers of one attempt have done so far.
#[derive(Debug, Default)]
pub struct AttemptState {
    /// Tier whose changes the attempt relies on.
    pub applied: Option<StrategyKind>,
    /// Last tier that ran but could not apply its change.
    pub last_tried: Option<StrategyKind>,
    pub verified: bool,
    pub detail: Option<String>,
}

impl AttemptState {
    /// Strategy recorded for the attempt.
    pub fn strategy(&self) -> StrategyKind {
        self.applied
            .or(self.last_tried)
            .unwrap_or(StrategyKind::TransientFallback)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    NotApplicable,
    Applied(StrategyKind),
    Verified,
    Failed(String),
}

pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Kind recorded when this tier ran but failed.
    fn recorded_as(&self) -> Option<StrategyKind> {
        None
    }

    fn attempt(&self, ctx: &RecoveryContext<'_>, state: &AttemptState) -> StrategyOutcome;
}

/// Built-in tiers in priority order.
pub fn default_strategies() -> Vec<Box<dyn RecoveryStrategy>> {
    vec![
        Box::new(InheritStructure),
        Box::new(TransientFallback),
        Box::new(SelfRepairVerification),
    ]
}

/// Fold a tier's result into the attempt state.
pub fn apply_outcome(
    state: &mut AttemptState,
    tier: &dyn RecoveryStrategy,
    outcome: StrategyOutcome,
) {
    match outcome {
        StrategyOutcome::NotApplicable => debug!("{} not applicable", tier.name()),
        StrategyOutcome::Applied(kind) => state.applied = Some(kind),
        StrategyOutcome::Verified => state.verified = true,
        StrategyOutcome::Failed(reason) => {
            debug!("{} failed: {}", tier.name(), reason);
            if let Some(kind) = tier.recorded_as() {
                state.last_tried = Some(kind);
            }
            state.detail = Some(reason);
        }
    }
}

/// Rebuild the declared node and its missing ancestors, parents first.
#[derive(Debug, Default, Clone, Copy)]
pub struct InheritStructure;

impl RecoveryStrategy for InheritStructure {
    fn name(&self) -> &'static str {
        "inherit-structure"
    }

    fn recorded_as(&self) -> Option<StrategyKind> {
        Some(StrategyKind::InheritStructure)
    }

    fn attempt(&self, ctx: &RecoveryContext<'_>, _state: &AttemptState) -> StrategyOutcome {
        if !ctx.dag_enabled {
            return StrategyOutcome::NotApplicable;
        }
        let Some(node) = ctx.node else {
            return StrategyOutcome::NotApplicable;
        };

        let exists = |n: &StructureNode| {
            ctx.resolver
                .resolve(&n.path)
                .is_ok_and(|r| StructureKind::of(r.absolute()).is_some())
        };

        let mut created_ancestor = false;
        for step in ctx.graph.rebuild_order(node, exists) {
            let resolved = match ctx.resolver.resolve(&step.path) {
                Ok(r) => r,
                Err(e) => return StrategyOutcome::Failed(e.to_string()),
            };
            match StructureKind::of(resolved.absolute()) {
                Some(kind) if kind == step.kind => continue,
                Some(kind) => {
                    return StrategyOutcome::Failed(format!(
                        "{} exists as a {} but is declared as a {}",
                        step.path, kind, step.kind
                    ));
                }
                None => {}
            }

            if let Err(e) = create_node(resolved.absolute(), step.kind) {
                return StrategyOutcome::Failed(format!("cannot create {}: {}", step.path, e));
            }
            ctx.metrics.record_dag_node_rebuilt();
            ctx.events.emit(
                GovernanceEvent::new(EventType::DagNodeRebuilt, resolved.key())
                    .with_detail(step.id.clone()),
            );
            if step.id != node.id {
                created_ancestor = true;
            }
        }

        StrategyOutcome::Applied(if created_ancestor {
            StrategyKind::DagRebuild
        } else {
            StrategyKind::InheritStructure
        })
    }
}

/// Restore the last snapshotted content, or create a placeholder.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransientFallback;

impl RecoveryStrategy for TransientFallback {
    fn name(&self) -> &'static str {
        "transient-fallback"
    }

    fn recorded_as(&self) -> Option<StrategyKind> {
        Some(StrategyKind::TransientFallback)
    }

    fn attempt(&self, ctx: &RecoveryContext<'_>, state: &AttemptState) -> StrategyOutcome {
        if state.applied.is_some() {
            return StrategyOutcome::NotApplicable;
        }

        let path = ctx.target.absolute();
        let kind = ctx.restore_kind;
        match StructureKind::of(path) {
            Some(existing) if existing == kind => {
                return StrategyOutcome::Applied(StrategyKind::TransientFallback);
            }
            Some(existing) => {
                return StrategyOutcome::Failed(format!(
                    "{} is occupied by a {}",
                    ctx.target.key(),
                    existing
                ));
            }
            None => {}
        }

        let source = ctx.snapshots.latest_snapshot().and_then(|snapshot| {
            snapshot
                .entry(&ctx.target.key())
                .filter(|e| e.kind == kind)
                .map(|e| (snapshot.id.clone(), e.clone()))
        });

        let result = match kind {
            StructureKind::Directory => fs::create_dir_all(path).map(|_| false),
            StructureKind::File => {
                let content = source
                    .as_ref()
                    .and_then(|(_, entry)| ctx.snapshots.restore_content(entry));
                write_new_file(path, content.as_deref().unwrap_or_default())
                    .map(|_| content.is_some())
            }
        };

        let restored_content = match result {
            Ok(restored) => restored,
            Err(e) => {
                warn!("Fallback for {} failed: {}", ctx.target.key(), e);
                return StrategyOutcome::Failed(format!(
                    "cannot create {}: {}",
                    ctx.target.key(),
                    e
                ));
            }
        };

        let detail = match (&source, restored_content) {
            (Some((id, _)), true) => format!("restored {} from snapshot {}", kind, id),
            (Some((id, _)), false) if kind == StructureKind::Directory => {
                format!("restored directory from snapshot {}", id)
            }
            _ => format!("created placeholder {}", kind),
        };
        ctx.events.emit(
            GovernanceEvent::new(EventType::FallbackTriggered, ctx.target.key()).with_detail(detail),
        );
        StrategyOutcome::Applied(StrategyKind::TransientFallback)
    }
}

/// Re-run the existence/kind check after the other tiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelfRepairVerification;

impl RecoveryStrategy for SelfRepairVerification {
    fn name(&self) -> &'static str {
        "self-repair-verification"
    }

    fn attempt(&self, ctx: &RecoveryContext<'_>, _state: &AttemptState) -> StrategyOutcome {
        if ctx.is_satisfied() {
            StrategyOutcome::Verified
        } else {
            StrategyOutcome::Failed(format!(
                "{} still missing after attempt {}",
                ctx.target.key(),
                ctx.attempt_number
            ))
        }
    }
}

fn create_node(path: &Path, kind: StructureKind) -> std::io::Result<()> {
    match kind {
        StructureKind::Directory => fs::create_dir_all(path),
        StructureKind::File => write_new_file(path, &[]),
    }
}

/// Create `path` with `content`; never follows or replaces an existing entry.
fn write_new_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(content)?;
    file.sync_all()
}
