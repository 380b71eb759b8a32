//! Purge coordinator.
//!
//! Applies a purge locally and, when asked, fans it out to every peer in the
//! current directory snapshot. Fan-out is concurrent and fails on the first
//! peer that does not answer `200`; the caller retries the whole purge.
//! Peers purge locally only, so a fan-out never propagates further.

use std::sync::Arc;

use futures::future::try_join_all;
use metrics::counter;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::peers::{PeerDirectory, PeerTransport};

use super::keys::PagePath;
use super::service::PageCache;

pub(crate) const METRIC_PURGE: &str = "fleetcache_purge_total";
pub(crate) const METRIC_PEER_PURGE_FAILED: &str = "fleetcache_peer_purge_failed_total";

#[derive(Debug, Error)]
pub enum PurgeError {
    #[error("peer {peer} answered purge with status {status}")]
    PeerRejected { peer: String, status: u16 },
    #[error("peer {peer} unreachable: {message}")]
    PeerUnreachable { peer: String, message: String },
}

impl PurgeError {
    pub fn peer(&self) -> &str {
        match self {
            PurgeError::PeerRejected { peer, .. } | PurgeError::PeerUnreachable { peer, .. } => {
                peer.as_str()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeOptions {
    /// Suppress re-caching of the path for the configured window.
    pub prevent_cache: bool,
    /// Fan the purge out to every known peer.
    pub recursive: bool,
}

/// What a successful purge did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeSummary {
    /// Whether a local entry existed and was removed.
    pub removed_locally: bool,
    /// Number of peers that acknowledged the purge.
    pub peers_purged: usize,
}

pub struct PurgeCoordinator {
    cache: Arc<PageCache>,
    directory: Arc<PeerDirectory>,
    transport: Arc<dyn PeerTransport>,
}

impl PurgeCoordinator {
    pub fn new(
        cache: Arc<PageCache>,
        directory: Arc<PeerDirectory>,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            cache,
            directory,
            transport,
        }
    }

    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    /// Purge `path` here and, if `options.recursive`, on every peer.
    ///
    /// Local effects (suppression, entry removal) are applied before the
    /// fan-out is awaited and stand even when a peer fails.
    #[instrument(skip(self, path), fields(path = %path))]
    pub async fn purge(
        &self,
        path: &PagePath,
        options: PurgeOptions,
    ) -> Result<PurgeSummary, PurgeError> {
        counter!(METRIC_PURGE).increment(1);

        if options.prevent_cache {
            self.cache.suppress(path);
        }
        let removed_locally = self.cache.purge_path(path);

        let peers_purged = if options.recursive {
            self.fan_out(path, options.prevent_cache).await?
        } else {
            0
        };

        info!(
            removed_locally,
            peers_purged,
            prevent_cache = options.prevent_cache,
            recursive = options.recursive,
            "purge complete"
        );

        Ok(PurgeSummary {
            removed_locally,
            peers_purged,
        })
    }

    async fn fan_out(&self, path: &PagePath, prevent_cache: bool) -> Result<usize, PurgeError> {
        let peers = self.directory.current_peers();
        if peers.is_empty() {
            return Ok(0);
        }

        let calls = peers
            .iter()
            .map(|peer| self.transport.purge(peer, path, prevent_cache));

        match try_join_all(calls).await {
            Ok(acks) => Ok(acks.len()),
            Err(err) => {
                counter!(METRIC_PEER_PURGE_FAILED).increment(1);
                warn!(
                    peer = err.peer(),
                    error = %err,
                    peers = peers.len(),
                    "peer purge failed; requesting directory refresh"
                );
                self.directory.request_refresh();
                Err(err)
            }
        }
    }
}
