//! End-to-end tests for the proxy router against a mock upstream.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use pagecache_core::{CacheRule, CacheStatus, Coordinator, RuleSet};
use pagecache_proxy::{AppState, Upstream, build_router};
use pagecache_store::MemoryStore;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{header as header_matcher, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn proxy(upstream: &str) -> Router {
    let rules = RuleSet::new(vec![CacheRule::new("/products", 60, 30)]).unwrap();
    let coordinator = Coordinator::new(Arc::new(MemoryStore::new()), rules);
    let upstream = Upstream::new(upstream.parse().unwrap(), Duration::from_secs(5), 1 << 20).unwrap();
    build_router(AppState::new(Arc::new(coordinator)), upstream, 1 << 20)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_cached_path_reaches_upstream_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products"))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .insert_header("set-cookie", "session=abc")
                .set_body_string("<ul>products</ul>"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let app = proxy(&server.uri()).await;

    let first = app.clone().oneshot(get("/products?page=2")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.extensions().get::<CacheStatus>(), Some(&CacheStatus::Miss));
    assert_eq!(first.headers()[header::SET_COOKIE], "session=abc");
    assert_eq!(body_text(first).await, "<ul>products</ul>");

    let second = app.clone().oneshot(get("/products?page=2")).await.unwrap();
    assert_eq!(second.extensions().get::<CacheStatus>(), Some(&CacheStatus::Hit));
    assert_eq!(second.headers()[header::CONTENT_TYPE], "text/html");
    assert!(second.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(body_text(second).await, "<ul>products</ul>");
}

#[tokio::test]
async fn test_uncached_path_is_forwarded_every_time() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/account"))
        .and(header_matcher("cookie", "session=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .expect(2)
        .mount(&server)
        .await;

    let app = proxy(&server.uri()).await;

    for _ in 0..2 {
        let request = Request::builder()
            .uri("/account")
            .header(header::COOKIE, "session=abc")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(
            response.extensions().get::<CacheStatus>(),
            Some(&CacheStatus::Bypass)
        );
        assert_eq!(body_text(response).await, "hello");
    }
}

#[tokio::test]
async fn test_upstream_server_error_is_passed_through_uncached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(2)
        .mount(&server)
        .await;

    let app = proxy(&server.uri()).await;

    for _ in 0..2 {
        let response = app.clone().oneshot(get("/products")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(response).await, "maintenance");
    }
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    // nothing listens on the discard port
    let app = proxy("http://127.0.0.1:9").await;

    let response = app.oneshot(get("/products")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_health_reports_metrics() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let app = proxy(&server.uri()).await;
    app.clone().oneshot(get("/products")).await.unwrap();
    app.clone().oneshot(get("/products")).await.unwrap();
    app.clone().oneshot(get("/elsewhere")).await.unwrap();

    let response = app.clone().oneshot(get("/_pagecache/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let report: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(report["status"]["state"], "healthy");
    assert_eq!(report["store"], "memory");
    assert_eq!(report["rules"], 1);
    assert_eq!(report["metrics"]["misses"], 1);
    assert_eq!(report["metrics"]["hits"], 1);
    assert_eq!(report["metrics"]["bypasses"], 1);
}
