//! Cache key helpers.
//!
//! Cache entries are keyed by normalized request path. Content identifiers and
//! version markers are opaque strings supplied by the render pipeline.

use std::fmt;

/// Normalized request path used as a cache key.
///
/// Always starts with `/`, never contains empty segments and never ends with
/// `/` unless it is the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PagePath(String);

impl PagePath {
    pub fn new(raw: &str) -> Self {
        let mut normalized = String::with_capacity(raw.len() + 1);
        for segment in raw.split('/').filter(|segment| !segment.is_empty()) {
            normalized.push('/');
            normalized.push_str(segment);
        }
        if normalized.is_empty() {
            normalized.push('/');
        }
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Every cumulative prefix of this path, shortest first, ending with the
    /// path itself. `/a/b/c` yields `/a`, `/a/b`, `/a/b/c`.
    pub fn ancestors(&self) -> Vec<PagePath> {
        if self.is_root() {
            return vec![self.clone()];
        }

        let mut prefixes = Vec::new();
        let mut current = String::with_capacity(self.0.len());
        for segment in self.0.split('/').skip(1) {
            current.push('/');
            current.push_str(segment);
            prefixes.push(PagePath(current.clone()));
        }
        prefixes
    }
}

impl fmt::Display for PagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PagePath {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Opaque content identifier.
pub type ContentId = String;

/// Opaque content version marker, compared for equality only.
pub type ModifiedAt = String;
