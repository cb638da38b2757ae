//! Test fixtures.

use axum::body::Body;
use axum::http::{HeaderMap, Request, Response};
use chrono::{DateTime, TimeZone, Utc};
use pagecache_core::{CacheRule, RuleSet, SESSION_HEADERS};

/// Prefix covered by [`rules`].
pub const CACHED_PREFIX: &str = "/page";

/// Fixed start of every test timeline.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap()
}

/// One rule caching everything under [`CACHED_PREFIX`].
pub fn rules(ttl_seconds: u64, grace_seconds: u64) -> RuleSet {
    RuleSet::new(vec![CacheRule::new(CACHED_PREFIX, ttl_seconds, grace_seconds)]).unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Response headers minus session headers, for comparing a served copy
/// against the response it was captured from.
pub fn headers_without_session(headers: &HeaderMap) -> Vec<(String, Vec<u8>)> {
    let mut out: Vec<_> = headers
        .iter()
        .filter(|(name, _)| !SESSION_HEADERS.contains(&name.as_str()))
        .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
        .collect();
    out.sort();
    out
}
