//! Cache Metrics Collection
//!
//! Lock-free counters for the tiered cache and prefetcher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Tier lookups
    local_hits: AtomicU64,
    shared_hits: AtomicU64,
    misses: AtomicU64,

    // Outbound path
    coalesced_waits: AtomicU64,
    provider_fetches: AtomicU64,
    provider_failures: AtomicU64,
    store_errors: AtomicU64,

    // Fetch latency (microseconds, exponential moving average)
    fetch_latency_us: AtomicU64,

    // Prefetch
    prefetch_enqueued: AtomicU64,
    prefetch_skipped: AtomicU64,
    prefetch_batches: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_local_hit(&self) {
        self.local_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_shared_hit(&self) {
        self.shared_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced_wait(&self) {
        self.coalesced_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_fetch(&self, duration: Duration) {
        self.provider_fetches.fetch_add(1, Ordering::Relaxed);
        self.update_latency_ema(duration);
    }

    pub fn record_provider_failure(&self) {
        self.provider_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prefetch_enqueued(&self) {
        self.prefetch_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prefetch_skipped(&self) {
        self.prefetch_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prefetch_batch(&self) {
        self.prefetch_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn local_hits(&self) -> u64 {
        self.local_hits.load(Ordering::Relaxed)
    }

    pub fn shared_hits(&self) -> u64 {
        self.shared_hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn provider_fetches(&self) -> u64 {
        self.provider_fetches.load(Ordering::Relaxed)
    }

    fn update_latency_ema(&self, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1;

        loop {
            let current = self.fetch_latency_us.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if self
                .fetch_latency_us
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn fetch_latency(&self) -> Duration {
        Duration::from_micros(self.fetch_latency_us.load(Ordering::Relaxed))
    }

    /// Share of lookups answered by either tier
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.local_hits() + self.shared_hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            local_hits: self.local_hits(),
            shared_hits: self.shared_hits(),
            misses: self.misses(),
            coalesced_waits: self.coalesced_waits.load(Ordering::Relaxed),
            provider_fetches: self.provider_fetches(),
            provider_failures: self.provider_failures.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            fetch_latency_us: self.fetch_latency_us.load(Ordering::Relaxed),
            prefetch_enqueued: self.prefetch_enqueued.load(Ordering::Relaxed),
            prefetch_skipped: self.prefetch_skipped.load(Ordering::Relaxed),
            prefetch_batches: self.prefetch_batches.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
        }
    }
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub local_hits: u64,
    pub shared_hits: u64,
    pub misses: u64,
    pub coalesced_waits: u64,
    pub provider_fetches: u64,
    pub provider_failures: u64,
    pub store_errors: u64,
    pub fetch_latency_us: u64,
    pub prefetch_enqueued: u64,
    pub prefetch_skipped: u64,
    pub prefetch_batches: u64,
    pub hit_ratio: f64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_tracking() {
        let metrics = CacheMetrics::new();

        metrics.record_local_hit();
        metrics.record_shared_hit();
        metrics.record_miss();

        assert_eq!(metrics.local_hits(), 1);
        assert_eq!(metrics.shared_hits(), 1);
        assert!((metrics.hit_ratio() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_fetch_latency_ema() {
        let metrics = CacheMetrics::new();

        metrics.record_provider_fetch(Duration::from_micros(100));
        assert_eq!(metrics.fetch_latency(), Duration::from_micros(100));

        metrics.record_provider_fetch(Duration::from_micros(200));
        let latency = metrics.fetch_latency().as_micros();
        assert!(latency > 100 && latency < 200);
        assert_eq!(metrics.provider_fetches(), 2);
    }

    #[test]
    fn test_snapshot() {
        let metrics = CacheMetrics::new();

        metrics.record_coalesced_wait();
        metrics.record_coalesced_wait();
        metrics.record_provider_failure();
        metrics.record_store_error();
        metrics.record_prefetch_enqueued();
        metrics.record_prefetch_skipped();
        metrics.record_prefetch_batch();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.coalesced_waits, 2);
        assert_eq!(snapshot.provider_failures, 1);
        assert_eq!(snapshot.store_errors, 1);
        assert_eq!(snapshot.prefetch_enqueued, 1);
        assert_eq!(snapshot.prefetch_skipped, 1);
        assert_eq!(snapshot.prefetch_batches, 1);
        assert_eq!(snapshot.hit_ratio, 0.0);
    }
}
