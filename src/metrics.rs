//! Governance counters and the sinks they are pushed to.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Point-in-time copy of the governance counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceMetrics {
    pub total_validations: u64,
    pub failures: u64,
    pub recovery_success: u64,
    pub recovery_failure: u64,
    pub snapshots_created: u64,
    pub dag_nodes_rebuilt: u64,
    /// `recovery_success / (recovery_success + recovery_failure)`; absent
    /// until at least one recovery has finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_rate: Option<f64>,
}

impl GovernanceMetrics {
    pub fn compute_success_rate(success: u64, failure: u64) -> Option<f64> {
        let total = success + failure;
        (total > 0).then(|| success as f64 / total as f64)
    }
}

/// Monotonic counters shared by a validator and its snapshot manager.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    total_validations: AtomicU64,
    failures: AtomicU64,
    recovery_success: AtomicU64,
    recovery_failure: AtomicU64,
    snapshots_created: AtomicU64,
    dag_nodes_rebuilt: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_validation(&self) {
        self.total_validations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recovery_success(&self) {
        self.recovery_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recovery_failure(&self) {
        self.recovery_failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot(&self) {
        self.snapshots_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dag_node_rebuilt(&self) {
        self.dag_nodes_rebuilt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GovernanceMetrics {
        let recovery_success = self.recovery_success.load(Ordering::Relaxed);
        let recovery_failure = self.recovery_failure.load(Ordering::Relaxed);
        GovernanceMetrics {
            total_validations: self.total_validations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            recovery_success,
            recovery_failure,
            snapshots_created: self.snapshots_created.load(Ordering::Relaxed),
            dag_nodes_rebuilt: self.dag_nodes_rebuilt.load(Ordering::Relaxed),
            success_rate: GovernanceMetrics::compute_success_rate(
                recovery_success,
                recovery_failure,
            ),
        }
    }
}

/// Telemetry collaborator that receives periodic metric pushes.
#[cfg_attr(test, mockall::automock)]
pub trait MetricsSink: Send + Sync {
    fn publish(&self, metrics: &GovernanceMetrics);
}

/// Writes each push to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn publish(&self, m: &GovernanceMetrics) {
        info!(
            total_validations = m.total_validations,
            failures = m.failures,
            recovery_success = m.recovery_success,
            recovery_failure = m.recovery_failure,
            snapshots_created = m.snapshots_created,
            dag_nodes_rebuilt = m.dag_nodes_rebuilt,
            success_rate = m.success_rate.unwrap_or(f64::NAN),
            "governance metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_undefined_without_recoveries() {
        let registry = MetricsRegistry::new();
        registry.record_validation();
        let m = registry.snapshot();
        assert_eq!(m.total_validations, 1);
        assert!(m.success_rate.is_none());

        let json = serde_json::to_value(m).unwrap();
        assert!(json.get("successRate").is_none());
        assert_eq!(json["totalValidations"], 1);
    }

    #[test]
    fn success_rate_within_bounds() {
        let registry = MetricsRegistry::new();
        registry.record_recovery_success();
        registry.record_recovery_success();
        registry.record_recovery_success();
        registry.record_recovery_failure();

        let rate = registry.snapshot().success_rate.unwrap();
        assert!((0.0..=1.0).contains(&rate));
        assert!((rate - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn rate_extremes() {
        assert_eq!(GovernanceMetrics::compute_success_rate(0, 4), Some(0.0));
        assert_eq!(GovernanceMetrics::compute_success_rate(4, 0), Some(1.0));
        assert_eq!(GovernanceMetrics::compute_success_rate(0, 0), None);
    }

    #[test]
    fn sink_receives_snapshot() {
        let registry = MetricsRegistry::new();
        registry.record_snapshot();
        registry.record_dag_node_rebuilt();

        let mut sink = MockMetricsSink::new();
        sink.expect_publish()
            .withf(|m| m.snapshots_created == 1 && m.dag_nodes_rebuilt == 1)
            .times(1)
            .return_const(());
        sink.publish(&registry.snapshot());
    }
}
