//! HTTP interception for pagecache.
//!
//! [`PageCacheLayer`] wraps any tower service producing HTTP responses and
//! answers matching requests from the shared store.

pub mod capture;
pub mod layer;
pub mod metrics;

pub use capture::{CollectedResponse, HOP_BY_HOP_HEADERS, capture, is_hop_by_hop, replay};
pub use layer::{BoxError, DEFAULT_MAX_BODY_BYTES, PageCacheLayer, PageCacheService};
pub use metrics::{CacheMetrics, MetricsSnapshot};
