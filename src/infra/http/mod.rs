//! HTTP surface: request front, renderer proxy and request tracing.

mod middleware;
mod upstream;

pub use middleware::{REQUEST_ID_HEADER, RequestId, trace_requests};
pub use upstream::{
    CONTENT_ID_HEADER, CONTENT_MODIFIED_AT_HEADER, UpstreamState, proxy_to_renderer,
};

use axum::{Router, middleware as axum_middleware};

use crate::cache::{CacheState, page_cache_layer};

/// Assemble the public router: every request passes the page cache before
/// falling through to the renderer.
pub fn build_router(cache: CacheState, upstream: UpstreamState) -> Router {
    Router::new()
        .fallback(proxy_to_renderer)
        .with_state(upstream)
        .layer(axum_middleware::from_fn_with_state(cache, page_cache_layer))
        .layer(axum_middleware::from_fn(trace_requests))
}
