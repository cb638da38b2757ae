//! HTTP server wiring.

use crate::config::{ProxyConfig, StoreKind};
use crate::health::HealthReport;
use crate::origin::Upstream;
use anyhow::Context as _;
use axum::error_handling::HandleErrorLayer;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use pagecache_core::{Coordinator, KvStore};
use pagecache_http::{BoxError, CacheMetrics, PageCacheLayer};
use pagecache_store::{MemcachedStore, MemoryStore};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Path of the health endpoint. Never cached.
pub const HEALTH_PATH: &str = "/_pagecache/health";

/// Shared state for the built-in routes.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub metrics: Arc<CacheMetrics>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        let started_at = coordinator.clock().now();
        Self {
            coordinator,
            metrics: CacheMetrics::new(),
            started_at,
        }
    }
}

/// Router serving the health endpoint and the cached upstream for everything else.
pub fn build_router(state: AppState, upstream: Upstream, max_body_bytes: usize) -> Router {
    let cache = PageCacheLayer::new(state.coordinator.clone())
        .with_metrics(state.metrics.clone())
        .with_max_body_bytes(max_body_bytes);

    let cached_upstream = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(handle_upstream_error))
        .layer(cache)
        .service(upstream);

    Router::new()
        .route(HEALTH_PATH, get(health))
        .fallback_service(cached_upstream)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthReport::check(&state.coordinator, &state.metrics, state.started_at).await)
}

async fn handle_upstream_error(err: BoxError) -> (StatusCode, String) {
    warn!(error = %err, "Upstream request failed");
    (StatusCode::BAD_GATEWAY, format!("upstream error: {err}"))
}

/// Open the configured store.
///
/// An unreachable memcached is not fatal: requests fall through to the
/// origin until it comes back.
pub async fn open_store(config: &ProxyConfig) -> Arc<dyn KvStore> {
    match config.store.kind {
        StoreKind::Memory => {
            info!("Using in-process memory store");
            Arc::new(MemoryStore::new())
        }
        StoreKind::Memcached => {
            let memcached = config.store.memcached_config();
            let address = memcached.address.clone();
            let store = MemcachedStore::new(memcached);
            match store.version().await {
                Ok(version) => info!(%address, %version, "Connected to memcached"),
                Err(e) => warn!(%address, error = %e, "memcached unreachable, serving from origin until it recovers"),
            }
            Arc::new(store)
        }
    }
}

/// Run the proxy until interrupted.
pub async fn serve(config: ProxyConfig) -> anyhow::Result<()> {
    let store = open_store(&config).await;
    let coordinator = Coordinator::new(store, config.rule_set()?)
        .with_namespace(config.key_namespace()?);
    let upstream = Upstream::new(
        config.upstream_url()?,
        config.upstream_timeout(),
        config.max_body_bytes,
    )
    .context("failed to build upstream client")?;

    for rule in coordinator.rules().iter() {
        info!(
            prefix = %rule.url_prefix,
            ttl = rule.ttl_seconds,
            grace = rule.grace_seconds,
            "Cache rule"
        );
    }

    let state = AppState::new(Arc::new(coordinator));
    let router = build_router(state, upstream, config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!(listen = %config.listen, upstream = %config.upstream, "pagecache listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("pagecache stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
