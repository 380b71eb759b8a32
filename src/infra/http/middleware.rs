//! Request tracing for the public router.
//!
//! Every request gets a uuid, echoed back in `x-request-id`, and runs inside a
//! `request` span. Completion is logged with the cache outcome reported by the
//! request front and, for failures, the attached [`ErrorReport`].

use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{Instrument, debug, error, info_span, warn};
use uuid::Uuid;

use crate::{cache::CacheOutcome, error::ErrorReport};

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Request id, available to handlers as a request extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId(pub Uuid);

pub async fn trace_requests(mut request: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    request.extensions_mut().insert(RequestId(request_id));

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    let start = Instant::now();
    let mut response = next.run(request).instrument(span.clone()).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    let status = response.status();
    let cache = response
        .extensions()
        .get::<CacheOutcome>()
        .copied()
        .map_or("bypass", CacheOutcome::as_str);
    let report = response.extensions_mut().remove::<ErrorReport>();

    span.in_scope(|| match report {
        Some(report) if status.is_server_error() => error!(
            target: "fleetcache::http::response",
            status = status.as_u16(),
            cache,
            elapsed_ms,
            source = report.source,
            chain = ?report.messages,
            "request failed"
        ),
        Some(report) => warn!(
            target: "fleetcache::http::response",
            status = status.as_u16(),
            cache,
            elapsed_ms,
            source = report.source,
            chain = ?report.messages,
            "request rejected"
        ),
        None if status.is_server_error() || status.is_client_error() => warn!(
            target: "fleetcache::http::response",
            status = status.as_u16(),
            cache,
            elapsed_ms,
            "request not served"
        ),
        None => debug!(
            target: "fleetcache::http::response",
            status = status.as_u16(),
            cache,
            elapsed_ms,
            "request served"
        ),
    });

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
