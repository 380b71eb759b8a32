//! Request front.
//!
//! Answers purge and edit requests through the [`PurgeCoordinator`], serves
//! cache hits verbatim, and lets everything else through to the renderer.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, instrument};

use crate::error::ErrorReport;

use super::{PageCache, PagePath, PurgeCoordinator, PurgeOptions};

/// Shared state for [`page_cache_layer`].
#[derive(Clone)]
pub struct CacheState {
    pub cache: Arc<PageCache>,
    pub coordinator: Arc<PurgeCoordinator>,
}

impl CacheState {
    pub fn new(coordinator: Arc<PurgeCoordinator>) -> Self {
        Self {
            cache: Arc::clone(coordinator.cache()),
            coordinator,
        }
    }
}

/// How the request front handled a request. Attached to the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    Purged,
    PurgeFailed,
}

impl CacheOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
            CacheOutcome::Purged => "purged",
            CacheOutcome::PurgeFailed => "purge_failed",
        }
    }
}

/// Purge-related query flags of an inbound request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeFlags {
    pub purge: bool,
    pub edit: bool,
    /// `None` when the query did not mention `recurse`.
    pub recurse: Option<bool>,
}

impl PurgeFlags {
    pub fn from_query(query: Option<&str>) -> Self {
        let mut flags = Self::default();
        let Some(query) = query else {
            return flags;
        };

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match &*key {
                "purge" => flags.purge = is_truthy(&value),
                "edit" => flags.edit = is_truthy(&value),
                "recurse" => flags.recurse = Some(is_truthy(&value)),
                _ => {}
            }
        }
        flags
    }

    /// Purge to run for these flags, if any.
    ///
    /// `edit` always suppresses re-caching. An explicit `recurse` decides
    /// fan-out. Without one, a bare `edit` comes from an authoring tool and
    /// fans out, while anything carrying `purge` (including fan-out requests
    /// from peers) stays local.
    pub fn options(&self) -> Option<PurgeOptions> {
        if !self.purge && !self.edit {
            return None;
        }
        Some(PurgeOptions {
            prevent_cache: self.edit,
            recursive: self.recurse.unwrap_or(!self.purge),
        })
    }
}

/// A bare flag (`?purge`) is truthy; so is any value other than the usual
/// spellings of "off".
fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    value.is_empty()
        || !["0", "false", "no", "off"]
            .iter()
            .any(|falsy| value.eq_ignore_ascii_case(falsy))
}

#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn page_cache_layer(
    State(state): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = PagePath::new(request.uri().path());

    if let Some(options) = PurgeFlags::from_query(request.uri().query()).options() {
        return match state.coordinator.purge(&path, options).await {
            Ok(_) => {
                let mut response = (StatusCode::OK, "OK").into_response();
                response.extensions_mut().insert(CacheOutcome::Purged);
                response
            }
            Err(err) => {
                let mut response =
                    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
                ErrorReport::from_error("cache::middleware::page_cache_layer", &err)
                    .attach(&mut response);
                response.extensions_mut().insert(CacheOutcome::PurgeFailed);
                response
            }
        };
    }

    if request.method() != Method::GET && request.method() != Method::HEAD {
        return next.run(request).await;
    }

    if let Some(page) = state.cache.lookup(&path) {
        debug!(cache = "page", outcome = "hit", "serving cached page");
        let mut response = page.into_response();
        response.extensions_mut().insert(CacheOutcome::Hit);
        return response;
    }

    debug!(cache = "page", outcome = "miss", "passing request to renderer");
    let mut response = next.run(request).await;
    response.extensions_mut().insert(CacheOutcome::Miss);
    response
}
