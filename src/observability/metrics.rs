//! Counters for the freshness layer
//!
//! - Counters only, monotonic
//! - Reset only on process start
//! - Relaxed atomics; exactness across threads is not required

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use serde::Serialize;

/// Operational counters shared by the bus, fetchers, dispatcher and guards
#[derive(Debug, Default)]
pub struct SyncMetrics {
    publishes: AtomicU64,
    deliveries: AtomicU64,
    subscriber_failures: AtomicU64,
    fetches: AtomicU64,
    fetches_coalesced: AtomicU64,
    fetch_failures: AtomicU64,
    mutations: AtomicU64,
    mutation_failures: AtomicU64,
    guard_refetches: AtomicU64,
}

impl SyncMetrics {
    /// Create a registry with every counter at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry
    pub fn global() -> &'static SyncMetrics {
        static GLOBAL: OnceLock<SyncMetrics> = OnceLock::new();
        GLOBAL.get_or_init(SyncMetrics::new)
    }

    pub fn record_publish(&self, delivered: usize, failed: usize) {
        self.publishes.fetch_add(1, Ordering::Relaxed);
        self.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
        self.subscriber_failures
            .fetch_add(failed as u64, Ordering::Relaxed);
    }

    pub fn increment_fetches(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_fetches_coalesced(&self) {
        self.fetches_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_fetch_failures(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_mutations(&self) {
        self.mutations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_mutation_failures(&self) {
        self.mutation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_guard_refetches(&self) {
        self.guard_refetches.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            publishes: self.publishes.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            subscriber_failures: self.subscriber_failures.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            fetches_coalesced: self.fetches_coalesced.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            mutations: self.mutations.load(Ordering::Relaxed),
            mutation_failures: self.mutation_failures.load(Ordering::Relaxed),
            guard_refetches: self.guard_refetches.load(Ordering::Relaxed),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or(serde_json::Value::Null)
    }
}

/// A point-in-time snapshot of all counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub publishes: u64,
    pub deliveries: u64,
    pub subscriber_failures: u64,
    pub fetches: u64,
    pub fetches_coalesced: u64,
    pub fetch_failures: u64,
    pub mutations: u64,
    pub mutation_failures: u64,
    pub guard_refetches: u64,
}
