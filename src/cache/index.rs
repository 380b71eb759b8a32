//! Content index.
//!
//! Tracks, per content identifier, the version it was last rendered at and
//! every path whose cached output derives from it.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::keys::{ContentId, ModifiedAt, PagePath};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::index";

/// Version marker and derived paths for one content identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRecord {
    pub modified_at: ModifiedAt,
    pub paths: HashSet<PagePath>,
}

impl ContentRecord {
    fn new(modified_at: &str) -> Self {
        Self {
            modified_at: modified_at.to_string(),
            paths: HashSet::new(),
        }
    }
}

/// Maps content identifiers to the rendered paths derived from them.
#[derive(Default)]
pub struct ContentIndex {
    records: RwLock<HashMap<ContentId, ContentRecord>>,
}

impl ContentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union `path` into the record for `id`, creating the record at
    /// `modified_at` if none exists. An existing record keeps its version.
    pub fn record(&self, id: &str, modified_at: &str, path: PagePath) {
        rw_write(&self.records, SOURCE, "record")
            .entry(id.to_string())
            .or_insert_with(|| ContentRecord::new(modified_at))
            .paths
            .insert(path);
    }

    /// Replace the record for `id` with an empty one at `new_modified_at`,
    /// returning the paths it held.
    ///
    /// Returns `None` without touching anything when no record exists or the
    /// stored version already equals `new_modified_at`.
    pub fn supersede(&self, id: &str, new_modified_at: &str) -> Option<HashSet<PagePath>> {
        let mut records = rw_write(&self.records, SOURCE, "supersede");
        let record = records.get_mut(id)?;
        if record.modified_at == new_modified_at {
            return None;
        }

        let stale = std::mem::replace(record, ContentRecord::new(new_modified_at));
        Some(stale.paths)
    }

    pub fn get(&self, id: &str) -> Option<ContentRecord> {
        rw_read(&self.records, SOURCE, "get").get(id).cloned()
    }

    /// Number of tracked content identifiers.
    pub fn len(&self) -> usize {
        rw_read(&self.records, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
