//! Response capture and replay.

use crate::layer::BoxError;
use axum::body::{Body, Bytes, HttpBody};
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::response::Parts;
use axum::http::{Response, StatusCode};
use futures::StreamExt;
use pagecache_core::{Capture, OriginResponse, ResponseRecord, SESSION_HEADERS, StoredHeader};
use tracing::{debug, warn};

/// Connection-level headers that describe one hop, never the resource.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

fn is_session_header(name: &HeaderName) -> bool {
    SESSION_HEADERS.contains(&name.as_str())
}

/// Copy a response into a storable record, without session headers.
pub fn capture(parts: &Parts, body: &[u8]) -> ResponseRecord {
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let headers = parts
        .headers
        .iter()
        .filter(|(name, _)| !is_session_header(name))
        .map(|(name, value)| StoredHeader::new(name.as_str(), value.as_bytes()))
        .collect();

    ResponseRecord {
        status: parts.status.as_u16(),
        content_type,
        headers,
        body: body.to_vec(),
    }
}

/// Rebuild a response from a stored record.
pub fn replay(record: &ResponseRecord) -> Response<Body> {
    let mut response = Response::new(Body::from(record.body.clone()));

    *response.status_mut() = match StatusCode::from_u16(record.status) {
        Ok(status) => status,
        Err(_) => {
            warn!(status = record.status, "Stored record has an invalid status");
            StatusCode::BAD_GATEWAY
        }
    };

    let headers = response.headers_mut();
    for stored in &record.headers {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(stored.name.as_bytes()),
            HeaderValue::from_bytes(&stored.value),
        ) else {
            debug!(header = %stored.name, "Skipping unreplayable header");
            continue;
        };
        if is_hop_by_hop(&name) {
            continue;
        }
        headers.append(name, value);
    }

    if !headers.contains_key(header::CONTENT_TYPE) {
        if let Some(value) = record
            .content_type
            .as_deref()
            .and_then(|ct| HeaderValue::from_str(ct).ok())
        {
            headers.insert(header::CONTENT_TYPE, value);
        }
    }

    response
}

/// An origin response, buffered for storage when it fits.
#[derive(Debug)]
pub struct CollectedResponse {
    pub parts: Parts,
    body: Collected,
}

#[derive(Debug)]
enum Collected {
    Buffered(Bytes),
    Passthrough(Body),
}

impl CollectedResponse {
    /// Buffer the body of `response` if it fits in `limit` bytes.
    ///
    /// A larger body is handed back to the caller untouched, chunks already
    /// read included, and the response is not stored.
    pub async fn collect<B>(response: Response<B>, limit: usize) -> Result<Self, BoxError>
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = response.into_parts();
        let body = Body::new(body);

        if declared_length(&parts, &body).is_some_and(|len| len > limit as u64) {
            debug!(limit, "Origin body larger than the storage limit");
            return Ok(Self::passthrough_parts(parts, body));
        }

        let mut stream = body.into_data_stream();
        let mut chunks: Vec<Bytes> = Vec::new();
        let mut read = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            read += chunk.len();
            chunks.push(chunk);
            if read > limit {
                debug!(limit, read, "Origin body outgrew the storage limit");
                let prefix = futures::stream::iter(chunks.into_iter().map(Ok));
                let body = Body::from_stream(prefix.chain(stream));
                return Ok(Self::passthrough_parts(parts, body));
            }
        }

        let mut buffered = Vec::with_capacity(read);
        for chunk in &chunks {
            buffered.extend_from_slice(chunk);
        }
        Ok(Self {
            parts,
            body: Collected::Buffered(Bytes::from(buffered)),
        })
    }

    /// Wrap `response` without reading it. It is never stored.
    pub fn passthrough<B>(response: Response<B>) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = response.into_parts();
        Self::passthrough_parts(parts, Body::new(body))
    }

    fn passthrough_parts(parts: Parts, body: Body) -> Self {
        Self {
            parts,
            body: Collected::Passthrough(body),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.parts.status
    }

    /// Whether the whole body was read into memory.
    pub fn is_buffered(&self) -> bool {
        matches!(self.body, Collected::Buffered(_))
    }

    /// The response as the origin produced it, session headers included.
    pub fn into_response(self) -> Response<Body> {
        let body = match self.body {
            Collected::Buffered(bytes) => Body::from(bytes),
            Collected::Passthrough(body) => body,
        };
        Response::from_parts(self.parts, body)
    }
}

/// Body length known before reading, from the body itself or `Content-Length`.
fn declared_length(parts: &Parts, body: &Body) -> Option<u64> {
    let hint = body.size_hint();
    if hint.lower() > 0 {
        return Some(hint.lower());
    }
    parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

impl OriginResponse for CollectedResponse {
    fn capture(&self) -> Capture {
        if self.parts.status.is_server_error() {
            return Capture::Failed;
        }
        match &self.body {
            Collected::Buffered(bytes) => Capture::Store(capture(&self.parts, bytes)),
            Collected::Passthrough(_) => Capture::Skip,
        }
    }
}
