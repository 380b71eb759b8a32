//! Proxy to the rendering service.
//!
//! Cache misses land here. Successful renders that identify their source
//! content are fed back into the [`PageCache`].

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::{
    cache::{AddOutcome, CachedPage, PageCache, PagePath},
    config::RenderSettings,
    error::ErrorReport,
    infra::error::InfraError,
};

pub const CONTENT_ID_HEADER: &str = "x-content-id";
pub const CONTENT_MODIFIED_AT_HEADER: &str = "x-content-modified-at";

#[derive(Clone)]
pub struct UpstreamState {
    client: Client,
    base: Url,
    cache: Arc<PageCache>,
    max_body_bytes: usize,
}

impl UpstreamState {
    pub fn new(cache: Arc<PageCache>, settings: &RenderSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(concat!("fleetcache/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| InfraError::upstream(format!("failed to build client: {err}")))?;
        Ok(Self::with_client(
            client,
            settings.upstream_url.clone(),
            cache,
            settings.max_body_bytes,
        ))
    }

    pub fn with_client(
        client: Client,
        base: Url,
        cache: Arc<PageCache>,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            client,
            base,
            cache,
            max_body_bytes,
        }
    }

    fn target(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.base.clone();
        let joined = format!("{}{}", self.base.path().trim_end_matches('/'), path);
        url.set_path(&joined);
        url.set_query(query);
        url
    }
}

pub async fn proxy_to_renderer(
    State(state): State<UpstreamState>,
    request: Request<Body>,
) -> Response {
    let method = request.method().clone();
    if method != Method::GET && method != Method::HEAD {
        let mut response = StatusCode::METHOD_NOT_ALLOWED.into_response();
        response
            .headers_mut()
            .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
        return response;
    }

    let path = PagePath::new(request.uri().path());
    let target = state.target(request.uri().path(), request.uri().query());

    let mut upstream = state.client.request(method.clone(), target);
    if let Some(accept) = request.headers().get(header::ACCEPT) {
        upstream = upstream.header(header::ACCEPT, accept.clone());
    }

    let response = match upstream.send().await {
        Ok(response) => response,
        Err(err) => return upstream_failure(&InfraError::upstream(err.to_string())),
    };

    let status = response.status();
    let headers = response.headers().clone();
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(err) => return upstream_failure(&InfraError::upstream(err.to_string())),
    };

    if status == StatusCode::OK && method == Method::GET {
        store_render(&state, &path, &headers, body.clone());
    }

    let mut reply = (status, body).into_response();
    match headers.get(header::CONTENT_TYPE) {
        Some(content_type) => {
            reply
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type.clone());
        }
        None => {
            reply.headers_mut().remove(header::CONTENT_TYPE);
        }
    }
    reply
}

fn store_render(state: &UpstreamState, path: &PagePath, headers: &HeaderMap, body: Bytes) {
    let Some(id) = header_str(headers, CONTENT_ID_HEADER) else {
        return;
    };
    let modified_at = header_str(headers, CONTENT_MODIFIED_AT_HEADER);

    if let Some(modified_at) = modified_at {
        state.cache.purge_by_id(id, modified_at);
    }

    if body.len() > state.max_body_bytes {
        debug!(
            path = %path,
            size = body.len(),
            limit = state.max_body_bytes,
            "render too large to cache"
        );
        return;
    }

    let mut page = CachedPage::new(body);
    if let Some(content_type) = header_str(headers, header::CONTENT_TYPE.as_str()) {
        page = page.with_content_type(content_type);
    }

    let outcome = state.cache.add(id, modified_at, path, page);
    debug!(path = %path, content_id = id, outcome = ?outcome, "render offered to cache");
    if outcome == AddOutcome::Unversioned {
        warn!(path = %path, content_id = id, "render carried no modification marker");
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn upstream_failure(err: &InfraError) -> Response {
    let mut response = (StatusCode::BAD_GATEWAY, "Upstream renderer unavailable").into_response();
    ErrorReport::from_error("infra::http::upstream::proxy_to_renderer", err)
        .attach(&mut response);
    response
}
