//! Cache configuration.
//!
//! Resolved from the `[cache]` section of `fleetcache.toml`.

use std::time::Duration;

use serde::Deserialize;

pub(crate) const DEFAULT_SUPPRESSION_WINDOW_SECS: u64 = 3600;

/// Runtime cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve and populate cached pages. Purge requests are honored either way.
    pub enabled: bool,
    /// How long an edited path stays excluded from re-caching, in seconds.
    pub suppression_window_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            suppression_window_seconds: DEFAULT_SUPPRESSION_WINDOW_SECS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            suppression_window_seconds: settings.suppression_window.as_secs(),
        }
    }
}

impl CacheConfig {
    /// Suppression window as a [`Duration`].
    pub fn suppression_window(&self) -> Duration {
        Duration::from_secs(self.suppression_window_seconds)
    }
}
