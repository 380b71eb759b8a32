//! Peer discovery and purge delivery.
//!
//! The [`PeerDirectory`] keeps a periodically refreshed snapshot of sibling
//! instance addresses obtained from a [`PeerSource`] (the Kubernetes API in
//! production). A [`PeerTransport`] delivers purges to those addresses.

mod directory;
mod error;
mod kubernetes;
mod transport;

pub use directory::{DirectoryState, PeerDirectory, PeerSource, PollSchedule};
pub use error::PeerError;
pub use kubernetes::{KubernetesPeerSource, pods_url, start_discovery};
pub use transport::{HttpPeerTransport, PeerTransport, peer_purge_url};

pub(crate) use directory::{METRIC_PEER_DIRECTORY_SIZE, METRIC_PEER_REFRESH_FAILED};
