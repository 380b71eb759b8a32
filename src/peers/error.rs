use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerError {
    /// No orchestration credential on disk. Peer discovery stays off for the
    /// life of the process.
    #[error("orchestration credential unavailable at {}: {source}", path.display())]
    CredentialUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("orchestration CA bundle at {} is unusable: {message}", path.display())]
    InvalidCaBundle { path: PathBuf, message: String },
    #[error("orchestration client misconfigured: {message}")]
    Client { message: String },
    #[error("peer directory refresh failed: {message}")]
    RefreshFailed { message: String },
}

impl PeerError {
    pub fn refresh_failed(message: impl Into<String>) -> Self {
        Self::RefreshFailed {
            message: message.into(),
        }
    }

    pub fn client(message: impl Into<String>) -> Self {
        Self::Client {
            message: message.into(),
        }
    }
}
