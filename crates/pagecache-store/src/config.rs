//! Configuration for the memcached store.

use std::time::Duration;

/// Configuration for [`MemcachedStore`](crate::MemcachedStore).
#[derive(Debug, Clone)]
pub struct MemcachedConfig {
    /// Server address (`host:port`).
    pub address: String,
    /// Maximum idle connections kept for reuse.
    pub pool_size: usize,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Timeout for a single command round trip.
    pub request_timeout: Duration,
}

impl Default for MemcachedConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:11211".to_string(),
            pool_size: 8,
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_millis(500),
        }
    }
}

impl MemcachedConfig {
    /// Create a new config for a single server.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// Set the number of idle connections kept for reuse.
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-command timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
