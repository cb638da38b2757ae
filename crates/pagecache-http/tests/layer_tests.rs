//! Tests for PageCacheLayer driven through tower.

use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode, header};
use chrono::{Duration, TimeZone, Utc};
use pagecache_core::{CacheRule, CacheStatus, Coordinator, ManualClock, RuleSet};
use pagecache_http::{BoxError, CacheMetrics, PageCacheLayer};
use pagecache_store::MemoryStore;
use pretty_assertions::assert_eq;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tower::util::BoxCloneService;
use tower::{Layer, ServiceExt, service_fn};

struct Harness {
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
    layer: PageCacheLayer,
    metrics: Arc<CacheMetrics>,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
    ));
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    let rules = RuleSet::new(vec![CacheRule::new("/cached", 10, 5)]).unwrap();
    let coordinator = Coordinator::new(store.clone(), rules).with_clock(clock.clone());
    let metrics = CacheMetrics::new();
    let layer = PageCacheLayer::new(Arc::new(coordinator)).with_metrics(metrics.clone());

    Harness {
        clock,
        store,
        layer,
        metrics,
    }
}

fn request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

type Origin = BoxCloneService<Request<Body>, Response<Body>, Infallible>;

/// Origin that answers with the number of times it has been called.
fn counting_origin(calls: Arc<AtomicUsize>, status: StatusCode) -> Origin {
    BoxCloneService::new(service_fn(move |_req: Request<Body>| {
        let calls = calls.clone();
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok::<_, Infallible>(
                Response::builder()
                    .status(status)
                    .header(header::CONTENT_TYPE, "text/plain")
                    .header(header::SET_COOKIE, format!("visit={n}"))
                    .body(Body::from(n.to_string()))
                    .unwrap(),
            )
        }
    }))
}

#[tokio::test]
async fn test_miss_then_hit() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));
    let service = h.layer.layer(counting_origin(calls.clone(), StatusCode::OK));

    let first = service.clone().oneshot(request("/cached/page?a=1")).await.unwrap();
    assert_eq!(first.extensions().get::<CacheStatus>(), Some(&CacheStatus::Miss));
    assert_eq!(first.headers()[header::SET_COOKIE], "visit=1");
    assert_eq!(body_text(first).await, "1");

    h.clock.advance(Duration::seconds(3));
    let second = service.clone().oneshot(request("/cached/page?a=1")).await.unwrap();
    assert_eq!(second.extensions().get::<CacheStatus>(), Some(&CacheStatus::Hit));
    assert_eq!(second.headers()[header::CONTENT_TYPE], "text/plain");
    assert!(second.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(body_text(second).await, "1");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.misses, 1);
    assert_eq!(snapshot.hits, 1);
}

#[tokio::test]
async fn test_query_string_is_part_of_the_key() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));
    let service = h.layer.layer(counting_origin(calls.clone(), StatusCode::OK));

    service.clone().oneshot(request("/cached/page?a=1")).await.unwrap();
    service.clone().oneshot(request("/cached/page?a=2")).await.unwrap();
    service.clone().oneshot(request("/cached/page?a=1")).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unmatched_path_bypasses_store() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));
    let service = h.layer.layer(counting_origin(calls.clone(), StatusCode::OK));

    for expected in ["1", "2"] {
        let response = service.clone().oneshot(request("/other")).await.unwrap();
        assert_eq!(
            response.extensions().get::<CacheStatus>(),
            Some(&CacheStatus::Bypass)
        );
        assert_eq!(body_text(response).await, expected);
    }

    assert!(h.store.is_empty());
    assert_eq!(h.metrics.snapshot().bypasses, 2);
}

#[tokio::test]
async fn test_server_error_is_not_stored() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));
    let service = h
        .layer
        .layer(counting_origin(calls.clone(), StatusCode::INTERNAL_SERVER_ERROR));

    let first = service.clone().oneshot(request("/cached")).await.unwrap();
    assert_eq!(first.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let second = service.clone().oneshot(request("/cached")).await.unwrap();
    assert_eq!(body_text(second).await, "2");

    assert!(h.store.is_empty());
    assert_eq!(h.metrics.snapshot().origin_failures, 2);
}

#[tokio::test]
async fn test_client_error_is_stored() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));
    let service = h.layer.layer(counting_origin(calls.clone(), StatusCode::NOT_FOUND));

    service.clone().oneshot(request("/cached")).await.unwrap();
    let second = service.clone().oneshot(request("/cached")).await.unwrap();

    assert_eq!(second.status(), StatusCode::NOT_FOUND);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_inner_error_passes_through() {
    let h = harness();
    let service = h.layer.layer(service_fn(|_req: Request<Body>| async {
        Err::<Response<Body>, BoxError>("upstream refused".into())
    }));

    let err = service.oneshot(request("/cached")).await.unwrap_err();
    assert_eq!(err.to_string(), "upstream refused");
    assert_eq!(h.metrics.snapshot().origin_failures, 1);
}

#[tokio::test]
async fn test_oversized_body_passes_through_unstored() {
    let h = harness();
    let layer = h.layer.clone().with_max_body_bytes(4);
    let service = layer.layer(service_fn(|_req: Request<Body>| async {
        Ok::<_, Infallible>(Response::new(Body::from("a 200 OK body from origin")))
    }));

    let response = service.oneshot(request("/cached")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.extensions().get::<CacheStatus>(),
        Some(&CacheStatus::Miss)
    );
    assert_eq!(body_text(response).await, "a 200 OK body from origin");
    assert!(h.store.is_empty());
    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.store_write_failures, 0);
    assert_eq!(snapshot.origin_failures, 0);
}

#[tokio::test]
async fn test_oversized_recompute_releases_lock() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));
    let service = h
        .layer
        .clone()
        .with_max_body_bytes(1)
        .layer(counting_origin(calls.clone(), StatusCode::OK));

    // "1" fits, the entry is stored
    service.clone().oneshot(request("/cached")).await.unwrap();
    h.clock.advance(Duration::seconds(11));

    // same store, but no body fits any more
    let big = h.layer.clone().with_max_body_bytes(0).layer(counting_origin(
        calls.clone(),
        StatusCode::OK,
    ));
    let recomputed = big.clone().oneshot(request("/cached")).await.unwrap();
    assert_eq!(
        recomputed.extensions().get::<CacheStatus>(),
        Some(&CacheStatus::Revalidated)
    );
    assert_eq!(body_text(recomputed).await, "2");

    // no lock lingers, so the next request recomputes instead of serving stale
    let again = big.oneshot(request("/cached")).await.unwrap();
    assert_eq!(
        again.extensions().get::<CacheStatus>(),
        Some(&CacheStatus::Revalidated)
    );
    assert_eq!(body_text(again).await, "3");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_head_response_is_not_stored() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));
    let origin = BoxCloneService::new(service_fn({
        let calls = calls.clone();
        move |req: Request<Body>| {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                let body = if req.method() == Method::HEAD {
                    Body::empty()
                } else {
                    Body::from(format!("page {n}"))
                };
                Ok::<_, Infallible>(
                    Response::builder()
                        .header(header::CONTENT_LENGTH, "6")
                        .body(body)
                        .unwrap(),
                )
            }
        }
    }));
    let service = h.layer.layer(origin);

    let head = Request::builder()
        .method(Method::HEAD)
        .uri("/cached")
        .body(Body::empty())
        .unwrap();
    let response = service.clone().oneshot(head).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(h.store.is_empty());

    let get = service.clone().oneshot(request("/cached")).await.unwrap();
    assert_eq!(get.extensions().get::<CacheStatus>(), Some(&CacheStatus::Miss));
    assert_eq!(body_text(get).await, "page 2");

    let cached = service.oneshot(request("/cached")).await.unwrap();
    assert_eq!(cached.extensions().get::<CacheStatus>(), Some(&CacheStatus::Hit));
    assert_eq!(body_text(cached).await, "page 2");
    assert_eq!(h.metrics.snapshot().store_write_failures, 0);
}
