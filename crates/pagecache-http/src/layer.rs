//! Tower layer answering matching requests through the [`Coordinator`].

use crate::capture::{CollectedResponse, replay};
use crate::metrics::CacheMetrics;
use axum::body::{Body, Bytes, HttpBody};
use axum::http::{Method, Request, Response};
use futures::future::BoxFuture;
use pagecache_core::{CacheKey, CacheStatus, Coordinator, Lookup};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::debug;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Largest origin body buffered for storage. Larger bodies are streamed
/// through and not stored.
pub const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Layer that caches responses of the wrapped service.
///
/// Requests whose path and query match a rule are answered from the store
/// when possible; everything else goes straight to the inner service. The
/// [`CacheStatus`] of every response is attached as an extension.
#[derive(Clone)]
pub struct PageCacheLayer {
    coordinator: Arc<Coordinator>,
    metrics: Arc<CacheMetrics>,
    max_body_bytes: usize,
}

impl PageCacheLayer {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            metrics: CacheMetrics::new(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Set the largest origin body that is buffered.
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Record into shared metrics.
    pub fn with_metrics(mut self, metrics: Arc<CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }
}

impl<S> Layer<S> for PageCacheLayer {
    type Service = PageCacheService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PageCacheService {
            inner,
            coordinator: self.coordinator.clone(),
            metrics: self.metrics.clone(),
            max_body_bytes: self.max_body_bytes,
        }
    }
}

/// Service produced by [`PageCacheLayer`].
#[derive(Clone)]
pub struct PageCacheService<S> {
    inner: S,
    coordinator: Arc<Coordinator>,
    metrics: Arc<CacheMetrics>,
    max_body_bytes: usize,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for PageCacheService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError> + Send,
    ReqBody: Send + 'static,
    ResBody: HttpBody<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<Body>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // Use the service that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let coordinator = self.coordinator.clone();
        let metrics = self.metrics.clone();
        let max_body_bytes = self.max_body_bytes;

        let target = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| req.uri().path().to_string());
        let rule = coordinator.match_rule(&target).cloned();
        // A HEAD response has no body, so it is never stored.
        let storable = req.method() != Method::HEAD;

        Box::pin(async move {
            let Some(rule) = rule else {
                debug!(target = %target, "No cache rule matched");
                metrics.record(CacheStatus::Bypass);
                let response = inner.call(req).await.map_err(Into::<BoxError>::into)?;
                let mut response = response.map(Body::new);
                response.extensions_mut().insert(CacheStatus::Bypass);
                return Ok(response);
            };

            let key = CacheKey::derive(&target);
            let lookup = coordinator
                .fetch(&rule, &key, move || async move {
                    let response = inner.call(req).await.map_err(Into::<BoxError>::into)?;
                    if storable {
                        CollectedResponse::collect(response, max_body_bytes).await
                    } else {
                        Ok(CollectedResponse::passthrough(response))
                    }
                })
                .await;

            let lookup = match lookup {
                Ok(lookup) => lookup,
                Err(e) => {
                    debug!(target = %target, error = %e, "Origin failed");
                    metrics.record_origin_failure();
                    return Err(e);
                }
            };

            let status = lookup.status();
            metrics.record(status);

            let mut response = match lookup {
                Lookup::Fresh(record) | Lookup::Stale(record) => replay(&record),
                Lookup::Computed {
                    response, stored, ..
                } => {
                    if response.status().is_server_error() {
                        metrics.record_origin_failure();
                    } else if !stored && response.is_buffered() {
                        metrics.record_store_write_failure();
                    }
                    response.into_response()
                }
            };
            response.extensions_mut().insert(status);
            Ok(response)
        })
    }
}
