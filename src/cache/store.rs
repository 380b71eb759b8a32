//! Rendered page storage.
//!
//! One entry per normalized path, overwritten on re-render and removed by
//! purge. Entries live until purged or the process exits.

use std::collections::HashMap;
use std::sync::RwLock;

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use metrics::counter;

use super::keys::PagePath;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

pub(crate) const METRIC_CACHE_HIT: &str = "fleetcache_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "fleetcache_cache_miss_total";

/// Cached rendered output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPage {
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl CachedPage {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            content_type: None,
            body: body.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

impl IntoResponse for CachedPage {
    /// Verbatim `200 OK` response for this page.
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = StatusCode::OK;

        if let Some(value) = self
            .content_type
            .as_deref()
            .and_then(|value| HeaderValue::from_str(value).ok())
        {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }

        response
    }
}

/// Path-keyed page cache.
#[derive(Default)]
pub struct CacheStore {
    pages: RwLock<HashMap<PagePath, CachedPage>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &PagePath) -> Option<CachedPage> {
        let cached = rw_read(&self.pages, SOURCE, "get").get(path).cloned();
        match cached {
            Some(_) => counter!(METRIC_CACHE_HIT).increment(1),
            None => counter!(METRIC_CACHE_MISS).increment(1),
        }
        cached
    }

    pub fn contains(&self, path: &PagePath) -> bool {
        rw_read(&self.pages, SOURCE, "contains").contains_key(path)
    }

    /// Store a page, returning the entry it replaced.
    pub fn insert(&self, path: PagePath, page: CachedPage) -> Option<CachedPage> {
        rw_write(&self.pages, SOURCE, "insert").insert(path, page)
    }

    /// Remove the entry for `path`, returning whether one existed.
    pub fn remove(&self, path: &PagePath) -> bool {
        rw_write(&self.pages, SOURCE, "remove")
            .remove(path)
            .is_some()
    }

    /// Remove whichever of `paths` currently have entries, under one write
    /// guard. Returns the paths actually removed.
    pub fn remove_existing<'a>(
        &self,
        paths: impl IntoIterator<Item = &'a PagePath>,
    ) -> Vec<PagePath> {
        let mut pages = rw_write(&self.pages, SOURCE, "remove_existing");
        paths
            .into_iter()
            .filter(|path| pages.remove(*path).is_some())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.pages, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
