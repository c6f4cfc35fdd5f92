//! Identifier generation for snapshots and attestations.
//!
//! Ids combine a process-local monotonic counter with a random suffix drawn
//! from the OS CSPRNG. The provider is injected so tests can swap in a
//! deterministic one.

use rand::RngExt;
use std::sync::atomic::{AtomicU64, Ordering};

const RANDOM_SUFFIX_BYTES: usize = 6;

/// Source of unique, prefixed identifiers (`att_...`, `snap_...`).
pub trait IdProvider: Send + Sync {
    fn next_id(&self, prefix: &str) -> String;
}

/// `<prefix>_<counter>_<random-hex>`; the counter is zero-padded so ids sort
/// in creation order within a process.
#[derive(Debug, Default)]
pub struct MonotonicIdProvider {
    counter: AtomicU64,
}

impl MonotonicIdProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdProvider for MonotonicIdProvider {
    fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let mut suffix = [0u8; RANDOM_SUFFIX_BYTES];
        rand::rng().fill(&mut suffix);
        format!("{prefix}_{n:08}_{}", hex::encode(suffix))
    }
}

/// True if `id` only contains characters safe to use as a file stem.
pub fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}
