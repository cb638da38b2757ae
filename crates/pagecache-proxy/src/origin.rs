//! Upstream origin reached over HTTP.

use axum::body::Body;
use axum::http::header::{self, HeaderMap};
use axum::http::{Request, Response};
use futures::future::BoxFuture;
use pagecache_http::{BoxError, is_hop_by_hop};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;
use tracing::debug;
use url::Url;

/// Forwards requests to a fixed base URL.
#[derive(Clone)]
pub struct Upstream {
    client: reqwest::Client,
    base: Arc<Url>,
    max_request_bytes: usize,
}

impl Upstream {
    pub fn new(base: Url, timeout: Duration, max_request_bytes: usize) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            base: Arc::new(base),
            max_request_bytes,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Upstream URL for an incoming path and query.
    pub fn target(&self, path_and_query: &str) -> Url {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };

        let mut url = (*self.base).clone();
        let base_path = self.base.path().trim_end_matches('/');
        url.set_path(&format!("{base_path}{path}"));
        url.set_query(query);
        url
    }

    /// Send the request upstream and buffer the reply.
    pub async fn forward(&self, req: Request<Body>) -> Result<Response<Body>, BoxError> {
        let (parts, body) = req.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = self.target(path_and_query);
        let body = axum::body::to_bytes(body, self.max_request_bytes).await?;

        debug!(method = %parts.method, url = %url, "Forwarding upstream");

        let upstream = self
            .client
            .request(parts.method, url)
            .headers(forwardable(&parts.headers, true))
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let headers = forwardable(upstream.headers(), false);
        let bytes = upstream.bytes().await?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Copy of `headers` without hop-by-hop headers (and `Host` for requests).
fn forwardable(headers: &HeaderMap, request: bool) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name) || (request && name == header::HOST) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

impl Service<Request<Body>> for Upstream {
    type Response = Response<Body>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let upstream = self.clone();
        Box::pin(async move { upstream.forward(req).await })
    }
}
