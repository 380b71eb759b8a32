//! Page cache service.
//!
//! Owns the cache store, content index and suppression windows for one
//! process. Populated by the render pipeline through [`PageCache::add`] and
//! invalidated through [`PageCache::purge_by_id`] and
//! [`PageCache::purge_path`].

use std::collections::BTreeSet;

use metrics::counter;
use tracing::{debug, info};

use super::config::CacheConfig;
use super::index::ContentIndex;
use super::keys::PagePath;
use super::store::{CacheStore, CachedPage};
use super::suppression::SuppressionWindows;

pub(crate) const METRIC_CACHE_STORE: &str = "fleetcache_cache_store_total";
pub(crate) const METRIC_CACHE_SUPPRESSED: &str = "fleetcache_cache_suppressed_total";

/// Result of [`PageCache::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Stored,
    /// No version marker was supplied; unversioned output is never cached.
    Unversioned,
    /// The path is inside a suppression window.
    Suppressed,
    /// Caching is switched off.
    Disabled,
}

pub struct PageCache {
    config: CacheConfig,
    store: CacheStore,
    index: ContentIndex,
    suppression: SuppressionWindows,
}

impl PageCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            store: CacheStore::new(),
            index: ContentIndex::new(),
            suppression: SuppressionWindows::new(),
        }
    }

    /// Cache `page` under `path` and link it to content `id`.
    pub fn add(
        &self,
        id: &str,
        modified_at: Option<&str>,
        path: &PagePath,
        page: CachedPage,
    ) -> AddOutcome {
        if !self.config.enabled {
            return AddOutcome::Disabled;
        }

        let Some(modified_at) = modified_at.filter(|value| !value.is_empty()) else {
            debug!(content_id = id, path = %path, "skipping unversioned render");
            return AddOutcome::Unversioned;
        };

        if self.suppression.is_suppressed(path) {
            counter!(METRIC_CACHE_SUPPRESSED).increment(1);
            debug!(content_id = id, path = %path, "skipping suppressed path");
            return AddOutcome::Suppressed;
        }

        self.store.insert(path.clone(), page);
        self.index.record(id, modified_at, path.clone());
        counter!(METRIC_CACHE_STORE).increment(1);
        debug!(content_id = id, modified_at, path = %path, "cached render");
        AddOutcome::Stored
    }

    /// Exact-path lookup.
    pub fn lookup(&self, path: &PagePath) -> Option<CachedPage> {
        if !self.config.enabled {
            return None;
        }
        self.store.get(path)
    }

    /// Invalidate everything derived from content `id` if its version moved.
    ///
    /// Each derived path is purged together with its ancestors, locally only.
    /// Returns the paths whose entries were removed.
    pub fn purge_by_id(&self, id: &str, new_modified_at: &str) -> Vec<PagePath> {
        let Some(stale) = self.index.supersede(id, new_modified_at) else {
            return Vec::new();
        };

        let candidates: BTreeSet<PagePath> = stale.iter().flat_map(PagePath::ancestors).collect();
        let removed = self.store.remove_existing(&candidates);

        info!(
            content_id = id,
            modified_at = new_modified_at,
            derived_paths = stale.len(),
            removed = removed.len(),
            "purged content by id"
        );
        removed
    }

    /// Remove the entry for `path` only.
    pub fn purge_path(&self, path: &PagePath) -> bool {
        self.store.remove(path)
    }

    /// Exclude `path` from caching for the configured window.
    pub fn suppress(&self, path: &PagePath) {
        self.suppression
            .suppress(path.clone(), self.config.suppression_window());
    }

    pub fn is_suppressed(&self, path: &PagePath) -> bool {
        self.suppression.is_suppressed(path)
    }

    /// Number of cached pages.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn index(&self) -> &ContentIndex {
        &self.index
    }
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;

    fn page(body: &'static str) -> CachedPage {
        CachedPage::new(Bytes::from_static(body.as_bytes()))
    }

    #[test]
    fn add_then_lookup_returns_payload() {
        let cache = PageCache::default();
        let path = PagePath::new("/posts/one");

        let outcome = cache.add("post-1", Some("v1"), &path, page("<h1>one</h1>"));

        assert_eq!(outcome, AddOutcome::Stored);
        assert_eq!(cache.lookup(&path), Some(page("<h1>one</h1>")));
    }

    #[test]
    fn add_without_version_is_ignored() {
        let cache = PageCache::default();
        let path = PagePath::new("/drafts/x");

        assert_eq!(cache.add("x", None, &path, page("x")), AddOutcome::Unversioned);
        assert_eq!(
            cache.add("x", Some(""), &path, page("x")),
            AddOutcome::Unversioned
        );
        assert!(cache.lookup(&path).is_none());
        assert!(cache.index().is_empty());
    }

    #[test]
    fn disabled_cache_neither_stores_nor_serves() {
        let cache = PageCache::new(CacheConfig {
            enabled: false,
            ..Default::default()
        });
        let path = PagePath::new("/a");

        assert_eq!(
            cache.add("a", Some("v1"), &path, page("a")),
            AddOutcome::Disabled
        );
        assert!(cache.store().is_empty());
        assert!(cache.lookup(&path).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn suppressed_add_keeps_prior_entry() {
        let cache = PageCache::new(CacheConfig {
            suppression_window_seconds: 30,
            ..Default::default()
        });
        let path = PagePath::new("/a");
        cache.add("a", Some("v1"), &path, page("old"));

        cache.suppress(&path);
        let outcome = cache.add("a", Some("v2"), &path, page("new"));

        assert_eq!(outcome, AddOutcome::Suppressed);
        assert_eq!(cache.lookup(&path), Some(page("old")));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(
            cache.add("a", Some("v2"), &path, page("new")),
            AddOutcome::Stored
        );
        assert_eq!(cache.lookup(&path), Some(page("new")));
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_window_suppresses_without_panicking() {
        let cache = PageCache::new(CacheConfig {
            suppression_window_seconds: u64::MAX,
            ..Default::default()
        });
        let path = PagePath::new("/a");

        cache.suppress(&path);

        assert!(cache.is_suppressed(&path));
        assert_eq!(
            cache.add("a", Some("v1"), &path, page("a")),
            AddOutcome::Suppressed
        );
    }

    #[test]
    fn purge_by_id_removes_derived_paths_and_ancestors() {
        let cache = PageCache::default();
        let a = PagePath::new("/a");
        let ab = PagePath::new("/a/b");
        let abc = PagePath::new("/a/b/c");
        let other = PagePath::new("/z");

        cache.add("parent", Some("v1"), &a, page("a"));
        cache.add("middle", Some("v1"), &ab, page("ab"));
        cache.add("leaf", Some("v1"), &abc, page("abc"));
        cache.add("other", Some("v1"), &other, page("z"));

        let removed = cache.purge_by_id("leaf", "v2");

        assert_eq!(removed, vec![a.clone(), ab.clone(), abc.clone()]);
        assert!(cache.lookup(&a).is_none());
        assert!(cache.lookup(&ab).is_none());
        assert!(cache.lookup(&abc).is_none());
        assert!(cache.lookup(&other).is_some());
    }

    #[test]
    fn purge_by_id_is_idempotent_per_version() {
        let cache = PageCache::default();
        let path = PagePath::new("/posts/one");
        cache.add("post-1", Some("v1"), &path, page("one"));

        assert_eq!(cache.purge_by_id("post-1", "v2"), vec![path.clone()]);

        // Re-rendered at the new version, then notified again with that version.
        cache.add("post-1", Some("v2"), &path, page("one v2"));
        assert!(cache.purge_by_id("post-1", "v2").is_empty());
        assert_eq!(cache.lookup(&path), Some(page("one v2")));
    }

    #[test]
    fn purge_by_id_with_unchanged_version_is_noop() {
        let cache = PageCache::default();
        let path = PagePath::new("/a");
        cache.add("a", Some("v1"), &path, page("a"));

        assert!(cache.purge_by_id("a", "v1").is_empty());
        assert!(cache.purge_by_id("unknown", "v9").is_empty());
        assert!(cache.lookup(&path).is_some());
    }

    #[test]
    fn purge_by_id_discards_stale_memberships() {
        let cache = PageCache::default();
        let old_path = PagePath::new("/old");
        let new_path = PagePath::new("/new");
        cache.add("post", Some("v1"), &old_path, page("old"));

        cache.purge_by_id("post", "v2");
        cache.add("post", Some("v2"), &new_path, page("new"));

        let record = cache.index().get("post").expect("record");
        assert_eq!(record.modified_at, "v2");
        assert_eq!(record.paths.len(), 1);
        assert!(record.paths.contains(&new_path));
    }
}
