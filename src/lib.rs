//! govguard - governed filesystem structure with self-healing recovery and
//! build provenance attestations.
//!
//! This crate provides:
//! - Safe-root path resolution that rejects traversal before any I/O
//! - A declared structure graph and a bounded, tiered self-healing validator
//! - Immutable structure snapshots with a hash-chained on-disk log
//! - SLSA-style build attestations over content digests

pub mod concurrency;
pub mod config;
pub mod digest;
pub mod error;
pub mod events;
pub mod fs_guard;
pub mod ids;
pub mod metrics;
pub mod paths;
pub mod provenance;
pub mod resolver;
pub mod snapshot;
pub mod structure;
pub mod validator;

pub use config::GovernanceConfig;
pub use error::{GovernanceError, Result};
pub use events::{EventBus, EventType, GovernanceEvent, Subscription};
pub use metrics::{GovernanceMetrics, MetricsSink, TracingMetricsSink};
pub use provenance::{AttestationService, AttestationStore, BuildAttestation, BuilderIdentity};
pub use resolver::SafePathResolver;
pub use snapshot::{SnapshotManager, StructureSnapshot};
pub use structure::{StructureGraph, StructureKind, StructureNode};
pub use validator::{PathValidator, ValidateOptions, ValidationOutcome, ValidationStatus};
