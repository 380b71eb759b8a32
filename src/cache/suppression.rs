//! Suppression windows.
//!
//! A suppressed path refuses new cache entries until its window expires. Each
//! path has at most one live window; re-suppressing cancels the previous
//! expiry timer and starts a new one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use super::keys::PagePath;

/// Deadline used when a window is too long to represent as an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

struct Window {
    generation: u64,
    deadline: Instant,
    expiry: JoinHandle<()>,
}

/// Paths temporarily excluded from caching.
#[derive(Default)]
pub struct SuppressionWindows {
    windows: Arc<DashMap<PagePath, Window>>,
    generations: AtomicU64,
}

impl SuppressionWindows {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suppress `path` for `duration`, replacing any window already armed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn suppress(&self, path: PagePath, duration: Duration) {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let deadline = now
            .checked_add(duration)
            .unwrap_or_else(|| now + FAR_FUTURE);

        let windows = Arc::clone(&self.windows);
        let key = path.clone();
        let expiry = tokio::spawn(async move {
            sleep_until(deadline).await;
            if windows
                .remove_if(&key, |_, window| window.generation == generation)
                .is_some()
            {
                debug!(path = %key, "suppression window expired");
            }
        });

        let replaced = self.windows.insert(
            path.clone(),
            Window {
                generation,
                deadline,
                expiry,
            },
        );
        if let Some(previous) = replaced {
            previous.expiry.abort();
        }

        debug!(
            path = %path,
            window_secs = duration.as_secs(),
            "suppression window armed"
        );
    }

    pub fn is_suppressed(&self, path: &PagePath) -> bool {
        let expired = match self.windows.get(path) {
            Some(window) => window.deadline <= Instant::now(),
            None => return false,
        };

        if expired {
            // Timer has not fired yet; drop the lapsed window eagerly.
            self.windows
                .remove_if(path, |_, window| window.deadline <= Instant::now());
        }
        !expired
    }

    /// Number of armed windows, including lapsed ones not yet reaped.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

impl Drop for SuppressionWindows {
    fn drop(&mut self) {
        for window in self.windows.iter() {
            window.expiry.abort();
        }
    }
}
