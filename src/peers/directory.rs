//! Peer directory.
//!
//! Holds the latest snapshot of sibling instance addresses. The snapshot is
//! swapped wholesale on every successful refresh, so readers always see one
//! complete list. Without an orchestration credential the directory never
//! leaves [`DirectoryState::Uninitialized`] and stays empty.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::cache::lock::{rw_read, rw_write};

use super::error::PeerError;

const SOURCE: &str = "peers::directory";

pub(crate) const METRIC_PEER_DIRECTORY_SIZE: &str = "fleetcache_peer_directory_size";
pub(crate) const METRIC_PEER_REFRESH_FAILED: &str = "fleetcache_peer_refresh_failed_total";

/// Lists the addresses of every running instance of this service.
#[async_trait]
pub trait PeerSource: Send + Sync {
    async fn list_peers(&self) -> Result<Vec<String>, PeerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryState {
    /// No credential; the directory is empty and never polled.
    Uninitialized,
    Polling,
}

/// Timing of the refresh loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    /// Grace delay before the first refresh.
    pub startup_delay: Duration,
    /// Delay between the end of one refresh and the start of the next.
    pub interval: Duration,
}

impl From<&crate::config::PeerSettings> for PollSchedule {
    fn from(settings: &crate::config::PeerSettings) -> Self {
        Self {
            startup_delay: settings.startup_delay,
            interval: settings.refresh_interval,
        }
    }
}

pub struct PeerDirectory {
    peers: RwLock<Arc<[String]>>,
    polling: AtomicBool,
    refresh_requested: Notify,
    self_address: Option<String>,
}

impl PeerDirectory {
    /// Create an empty directory. `self_address`, when known, is filtered out
    /// of every snapshot.
    pub fn new(self_address: Option<String>) -> Self {
        Self {
            peers: RwLock::new(Arc::from(Vec::new())),
            polling: AtomicBool::new(false),
            refresh_requested: Notify::new(),
            self_address,
        }
    }

    pub fn state(&self) -> DirectoryState {
        if self.polling.load(Ordering::Acquire) {
            DirectoryState::Polling
        } else {
            DirectoryState::Uninitialized
        }
    }

    /// Latest snapshot. Never waits for a refresh in progress.
    pub fn current_peers(&self) -> Arc<[String]> {
        Arc::clone(&rw_read(&self.peers, SOURCE, "current_peers"))
    }

    /// Swap in a new address list.
    pub fn replace(&self, mut addresses: Vec<String>) -> usize {
        if let Some(own) = self.self_address.as_deref() {
            addresses.retain(|address| address != own);
        }
        addresses.sort();
        addresses.dedup();

        let count = addresses.len();
        *rw_write(&self.peers, SOURCE, "replace") = Arc::from(addresses);
        gauge!(METRIC_PEER_DIRECTORY_SIZE).set(count as f64);
        count
    }

    /// Fetch the peer list once. On failure the previous snapshot is kept.
    pub async fn refresh(&self, source: &dyn PeerSource) -> Result<usize, PeerError> {
        match source.list_peers().await {
            Ok(addresses) => {
                let count = self.replace(addresses);
                info!(peers = count, "peer directory refreshed");
                Ok(count)
            }
            Err(err) => {
                counter!(METRIC_PEER_REFRESH_FAILED).increment(1);
                warn!(
                    error = %err,
                    retained = self.current_peers().len(),
                    "peer directory refresh failed; keeping previous snapshot"
                );
                Err(err)
            }
        }
    }

    /// Ask a running poll loop to refresh now instead of waiting out its
    /// interval. No effect while uninitialized or mid-refresh.
    pub fn request_refresh(&self) {
        if self.state() == DirectoryState::Polling {
            self.refresh_requested.notify_waiters();
        }
    }

    /// Enter [`DirectoryState::Polling`] and spawn the sequential refresh loop.
    ///
    /// Returns `None` if the directory is already polling.
    pub fn start_polling(
        self: &Arc<Self>,
        source: Arc<dyn PeerSource>,
        schedule: PollSchedule,
    ) -> Option<JoinHandle<()>> {
        if self.polling.swap(true, Ordering::AcqRel) {
            return None;
        }

        info!(
            startup_delay_secs = schedule.startup_delay.as_secs(),
            interval_secs = schedule.interval.as_secs(),
            "peer directory polling enabled"
        );

        let directory = Arc::clone(self);
        Some(tokio::spawn(async move {
            sleep(schedule.startup_delay).await;
            loop {
                // Failures are logged inside `refresh`; the loop carries on.
                let _ = directory.refresh(source.as_ref()).await;

                tokio::select! {
                    _ = sleep(schedule.interval) => {}
                    _ = directory.refresh_requested.notified() => {
                        debug!("early peer directory refresh requested");
                    }
                }
            }
        }))
    }
}
