//! Fleetcache page cache.
//!
//! Holds rendered pages per node and keeps them consistent across the fleet:
//!
//! - **Store**: normalized path -> rendered page
//! - **Index**: content id -> version + derived paths
//! - **Suppression**: paths temporarily barred from caching after an edit
//! - **Purge**: local and fleet-wide invalidation
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! suppression_window_seconds = 3600
//! ```

mod config;
mod index;
mod keys;
pub(crate) mod lock;
mod middleware;
mod purge;
mod service;
mod store;
mod suppression;

pub use config::CacheConfig;
pub use index::{ContentIndex, ContentRecord};
pub use keys::{ContentId, ModifiedAt, PagePath};
pub use middleware::{CacheOutcome, CacheState, PurgeFlags, page_cache_layer};
pub use purge::{PurgeCoordinator, PurgeError, PurgeOptions, PurgeSummary};
pub use service::{AddOutcome, PageCache};
pub use store::{CacheStore, CachedPage};
pub use suppression::SuppressionWindows;

pub(crate) use config::DEFAULT_SUPPRESSION_WINDOW_SECS;
pub(crate) use purge::{METRIC_PEER_PURGE_FAILED, METRIC_PURGE};
pub(crate) use service::{METRIC_CACHE_STORE, METRIC_CACHE_SUPPRESSED};
pub(crate) use store::{METRIC_CACHE_HIT, METRIC_CACHE_MISS};
