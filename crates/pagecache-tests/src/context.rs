//! Test context wiring a cached service to an in-process store.

use crate::fixtures::{get_request, start_time};
use crate::helpers::{CountingOrigin, RecordingStore};
use axum::body::Body;
use axum::http::Response;
use chrono::Duration;
use pagecache_core::{CacheEntry, CacheKey, Coordinator, KvStore, ManualClock, RuleSet};
use pagecache_http::{CacheMetrics, PageCacheLayer, PageCacheService};
use std::sync::Arc;
use tower::{Layer, ServiceExt};

/// One handler instance in front of a [`CountingOrigin`].
pub struct TestContext {
    pub clock: Arc<ManualClock>,
    pub store: Arc<RecordingStore>,
    pub origin: CountingOrigin,
    pub coordinator: Arc<Coordinator>,
    pub metrics: Arc<CacheMetrics>,
    pub service: PageCacheService<CountingOrigin>,
}

impl TestContext {
    pub fn new(rules: RuleSet) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let store = Arc::new(RecordingStore::new(clock.clone()));
        Self::assemble(clock, store, CountingOrigin::new(), rules)
    }

    /// A second, independent handler sharing this one's store, clock and origin.
    pub fn another_instance(&self) -> Self {
        Self::assemble(
            self.clock.clone(),
            self.store.clone(),
            self.origin.clone(),
            self.coordinator.rules().clone(),
        )
    }

    fn assemble(
        clock: Arc<ManualClock>,
        store: Arc<RecordingStore>,
        origin: CountingOrigin,
        rules: RuleSet,
    ) -> Self {
        let coordinator =
            Arc::new(Coordinator::new(store.clone(), rules).with_clock(clock.clone()));
        let metrics = CacheMetrics::new();
        let service = PageCacheLayer::new(coordinator.clone())
            .with_metrics(metrics.clone())
            .layer(origin.clone());

        Self {
            clock,
            store,
            origin,
            coordinator,
            metrics,
            service,
        }
    }

    /// Issue a GET through the cache.
    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.service
            .clone()
            .oneshot(get_request(uri))
            .await
            .unwrap()
    }

    pub fn advance_secs(&self, seconds: f64) {
        self.clock.advance_secs_f64(seconds);
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub fn data_key(&self, path_and_query: &str) -> String {
        self.coordinator
            .namespace()
            .data_key(&CacheKey::derive(path_and_query))
    }

    pub fn lock_key(&self, path_and_query: &str) -> String {
        self.coordinator
            .namespace()
            .lock_key(&CacheKey::derive(path_and_query))
    }

    /// Whether a recompute lock is live for the path.
    pub fn lock_held(&self, path_and_query: &str) -> bool {
        self.store.memory().contains(&self.lock_key(path_and_query))
    }

    /// The entry currently stored for the path, if live.
    pub async fn stored_entry(&self, path_and_query: &str) -> Option<CacheEntry> {
        let bytes = self
            .store
            .memory()
            .get(&self.data_key(path_and_query))
            .await
            .unwrap()?;
        Some(CacheEntry::decode(&bytes).unwrap())
    }
}
