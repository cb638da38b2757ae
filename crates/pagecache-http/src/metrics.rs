//! Counters for cache decisions.

use pagecache_core::CacheStatus;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics recorded by [`PageCacheLayer`](crate::PageCacheLayer).
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Fresh entries served.
    pub hits: AtomicU64,
    /// Expired entries served during their grace window.
    pub stale: AtomicU64,
    /// Requests with nothing stored.
    pub misses: AtomicU64,
    /// Recomputes performed under the lock.
    pub revalidations: AtomicU64,
    /// Requests no rule matched.
    pub bypasses: AtomicU64,
    /// Origin errors and server-error responses on matched paths.
    pub origin_failures: AtomicU64,
    /// Storable responses that could not be written.
    pub store_write_failures: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record how a request was answered.
    pub fn record(&self, status: CacheStatus) {
        let counter = match status {
            CacheStatus::Hit => &self.hits,
            CacheStatus::Stale => &self.stale,
            CacheStatus::Miss => &self.misses,
            CacheStatus::Revalidated => &self.revalidations,
            CacheStatus::Bypass => &self.bypasses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_origin_failure(&self) {
        self.origin_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_write_failure(&self) {
        self.store_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            revalidations: self.revalidations.load(Ordering::Relaxed),
            bypasses: self.bypasses.load(Ordering::Relaxed),
            origin_failures: self.origin_failures.load(Ordering::Relaxed),
            store_write_failures: self.store_write_failures.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub stale: u64,
    pub misses: u64,
    pub revalidations: u64,
    pub bypasses: u64,
    pub origin_failures: u64,
    pub store_write_failures: u64,
}

impl MetricsSnapshot {
    /// Requests that reached a caching decision.
    pub fn cached_requests(&self) -> u64 {
        self.hits + self.stale + self.misses + self.revalidations
    }

    /// Share of cached requests answered from the store.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.cached_requests();
        if total == 0 {
            return 0.0;
        }
        (self.hits + self.stale) as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let metrics = CacheMetrics::new();
        metrics.record(CacheStatus::Miss);
        metrics.record(CacheStatus::Hit);
        metrics.record(CacheStatus::Hit);
        metrics.record(CacheStatus::Stale);
        metrics.record(CacheStatus::Bypass);
        metrics.record_origin_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.stale, 1);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.bypasses, 1);
        assert_eq!(snapshot.origin_failures, 1);
        assert_eq!(snapshot.cached_requests(), 4);
        assert!((snapshot.hit_ratio() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_hit_ratio() {
        assert_eq!(MetricsSnapshot::default().hit_ratio(), 0.0);
    }
}
