//! Health report served at `/_pagecache/health`.

use chrono::{DateTime, Utc};
use pagecache_core::Coordinator;
use pagecache_http::{CacheMetrics, MetricsSnapshot};
use serde::Serialize;

/// Health status of the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HealthStatus {
    /// Store reachable.
    Healthy,
    /// Store unreachable; every request goes to the origin.
    Degraded { reason: String },
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Health check result with details.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub store: &'static str,
    pub namespace: String,
    pub rules: usize,
    pub uptime_seconds: i64,
    pub metrics: MetricsSnapshot,
}

impl HealthReport {
    /// Probe the store and combine the result with current metrics.
    pub async fn check(
        coordinator: &Coordinator,
        metrics: &CacheMetrics,
        started_at: DateTime<Utc>,
    ) -> Self {
        let probe_key = format!("{}:health", coordinator.namespace().as_str());
        let status = match coordinator.store().get(&probe_key).await {
            Ok(_) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Degraded {
                reason: e.to_string(),
            },
        };

        Self {
            status,
            store: coordinator.store().name(),
            namespace: coordinator.namespace().as_str().to_string(),
            rules: coordinator.rules().len(),
            uptime_seconds: (coordinator.clock().now() - started_at).num_seconds(),
            metrics: metrics.snapshot(),
        }
    }
}
