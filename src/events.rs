//! Governance lifecycle events.
//!
//! Each [`crate::validator::PathValidator`] owns its own [`EventBus`]; there
//! is no process-wide bus. Events are delivered synchronously in emission
//! order. A panicking subscriber is logged and skipped so it cannot abort
//! the operation that emitted the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    ValidationFailed,
    StructureMissing,
    StructureRecovered,
    FallbackTriggered,
    SnapshotCreated,
    DagNodeRebuilt,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        Self::ValidationFailed,
        Self::StructureMissing,
        Self::StructureRecovered,
        Self::FallbackTriggered,
        Self::SnapshotCreated,
        Self::DagNodeRebuilt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::StructureMissing => "STRUCTURE_MISSING",
            Self::StructureRecovered => "STRUCTURE_RECOVERED",
            Self::FallbackTriggered => "FALLBACK_TRIGGERED",
            Self::SnapshotCreated => "SNAPSHOT_CREATED",
            Self::DagNodeRebuilt => "DAG_NODE_REBUILT",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceEvent {
    pub kind: EventType,
    pub ts: DateTime<Utc>,
    /// Root-relative path (or snapshot id for `SNAPSHOT_CREATED`).
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl GovernanceEvent {
    pub fn new(kind: EventType, path: impl Into<String>) -> Self {
        Self {
            kind,
            ts: Utc::now(),
            path: path.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

pub type EventHandler = Arc<dyn Fn(&GovernanceEvent) + Send + Sync>;

struct Registered {
    id: u64,
    /// `None` subscribes to every event type.
    kind: Option<EventType>,
    handler: EventHandler,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    handlers: Mutex<Vec<Registered>>,
}

/// Synchronous, in-order event dispatch owned by one validator instance.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`].
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Remove the handler. Returns false if it was already gone or the bus
    /// has been dropped.
    pub fn unsubscribe(self) -> bool {
        let Some(inner) = self.bus.upgrade() else {
            return false;
        };
        let mut handlers = inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|h| h.id != self.id);
        handlers.len() != before
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventType, handler: F) -> Subscription
    where
        F: Fn(&GovernanceEvent) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler))
    }

    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&GovernanceEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    fn register(&self, kind: Option<EventType>, handler: EventHandler) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registered { id, kind, handler });
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every matching subscriber, in registration order.
    pub fn emit(&self, event: GovernanceEvent) {
        debug!(kind = %event.kind, path = %event.path, "governance event");

        // Handlers run outside the lock so they may subscribe or unsubscribe.
        let handlers: Vec<EventHandler> = self
            .inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|h| h.kind.is_none_or(|k| k == event.kind))
            .map(|h| Arc::clone(&h.handler))
            .collect();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                warn!("Event subscriber panicked while handling {}", event.kind);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
