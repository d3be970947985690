//! Counters exposed to observability.
//!
//! All counters are relaxed atomics: they are monotonic tallies read by a
//! scraper, never used for synchronization.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Adds one.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds `n`.
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Latency tally in microseconds.
#[derive(Debug, Default)]
pub struct Latency {
    count: AtomicU64,
    total_us: AtomicU64,
    max_us: AtomicU64,
}

impl Latency {
    /// Records one observation.
    pub fn record(&self, elapsed: Duration) {
        let us = elapsed.as_micros().min(u128::from(u64::MAX)) as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(us, Ordering::Relaxed);
        self.max_us.fetch_max(us, Ordering::Relaxed);
    }

    /// Point-in-time copy.
    #[must_use]
    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            count: self.count.load(Ordering::Relaxed),
            total_us: self.total_us.load(Ordering::Relaxed),
            max_us: self.max_us.load(Ordering::Relaxed),
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencySnapshot {
    pub count: u64,
    pub total_us: u64,
    pub max_us: u64,
}

/// Process-wide counters shared by the compile, registry and on-demand layers.
#[allow(missing_docs)]
#[derive(Debug, Default)]
pub struct Metrics {
    pub cache_hits: Counter,
    pub cache_misses: Counter,
    pub plan_fetch: Latency,
    pub plan_push: Latency,
    pub undeploys: Counter,
    pub bytecode_found: Counter,
    pub bytecode_compiled: Counter,
    pub bytecode_stored: Counter,
    pub bytecode_store_failed: Counter,
    pub bytecode_compile_failed: Counter,
    pub artifact_evictions: Counter,
}

impl Metrics {
    /// Creates a zeroed set of counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits.get(),
            cache_misses: self.cache_misses.get(),
            plan_fetch: self.plan_fetch.snapshot(),
            plan_push: self.plan_push.snapshot(),
            undeploys: self.undeploys.get(),
            bytecode_found: self.bytecode_found.get(),
            bytecode_compiled: self.bytecode_compiled.get(),
            bytecode_stored: self.bytecode_stored.get(),
            bytecode_store_failed: self.bytecode_store_failed.get(),
            bytecode_compile_failed: self.bytecode_compile_failed.get(),
            artifact_evictions: self.artifact_evictions.get(),
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub plan_fetch: LatencySnapshot,
    pub plan_push: LatencySnapshot,
    pub undeploys: u64,
    pub bytecode_found: u64,
    pub bytecode_compiled: u64,
    pub bytecode_stored: u64,
    pub bytecode_store_failed: u64,
    pub bytecode_compile_failed: u64,
    pub artifact_evictions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_tracks_count_total_and_max() {
        let latency = Latency::default();
        latency.record(Duration::from_micros(100));
        latency.record(Duration::from_micros(300));
        let snap = latency.snapshot();
        assert_eq!(snap.count, 2);
        assert_eq!(snap.total_us, 400);
        assert_eq!(snap.max_us, 300);
    }

    #[test]
    fn test_snapshot_serializes_as_flat_json() {
        let metrics = Metrics::new();
        metrics.cache_hits.inc();
        metrics.bytecode_compiled.add(3);
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["cache_hits"], 1);
        assert_eq!(json["bytecode_compiled"], 3);
        assert_eq!(json["plan_fetch"]["count"], 0);
    }
}
