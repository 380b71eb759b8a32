//! Outbound purge requests to sibling instances.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use crate::cache::{PagePath, PurgeError};

/// Delivers a local-only purge to one peer.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn purge(
        &self,
        peer: &str,
        path: &PagePath,
        prevent_cache: bool,
    ) -> Result<(), PurgeError>;
}

/// Plain-HTTP purge client targeting every peer on the same fixed port.
///
/// Carries no request timeout of its own; a peer purge waits as long as the
/// connection does.
pub struct HttpPeerTransport {
    client: Client,
    port: u16,
}

impl HttpPeerTransport {
    pub fn new(port: u16) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("fleetcache/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, port))
    }

    pub fn with_client(client: Client, port: u16) -> Self {
        Self { client, port }
    }
}

#[async_trait]
impl PeerTransport for HttpPeerTransport {
    async fn purge(
        &self,
        peer: &str,
        path: &PagePath,
        prevent_cache: bool,
    ) -> Result<(), PurgeError> {
        let url = peer_purge_url(peer, self.port, path, prevent_cache)?;
        debug!(peer, url = %url, "sending peer purge");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| PurgeError::PeerUnreachable {
                peer: peer.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(PurgeError::PeerRejected {
                peer: peer.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// `http://<peer>:<port><path>?purge=1[&edit=1]`
pub fn peer_purge_url(
    peer: &str,
    port: u16,
    path: &PagePath,
    prevent_cache: bool,
) -> Result<Url, PurgeError> {
    let host = if peer.contains(':') && !peer.starts_with('[') {
        format!("[{peer}]")
    } else {
        peer.to_string()
    };

    let mut url = Url::parse(&format!("http://{host}:{port}/")).map_err(|err| {
        PurgeError::PeerUnreachable {
            peer: peer.to_string(),
            message: format!("invalid peer address: {err}"),
        }
    })?;
    url.set_path(path.as_str());
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("purge", "1");
        if prevent_cache {
            query.append_pair("edit", "1");
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purge_url_for_plain_purge() {
        let url = peer_purge_url("10.0.0.7", 3000, &PagePath::new("/a/b"), false).unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.7:3000/a/b?purge=1");
    }

    #[test]
    fn purge_url_marks_edit() {
        let url = peer_purge_url("10.0.0.7", 3000, &PagePath::new("/"), true).unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.7:3000/?purge=1&edit=1");
    }

    #[test]
    fn purge_url_brackets_ipv6() {
        let url = peer_purge_url("fd00::12", 8080, &PagePath::new("/x"), false).unwrap();
        assert_eq!(url.as_str(), "http://[fd00::12]:8080/x?purge=1");
    }

    #[tokio::test]
    async fn slow_peer_is_awaited() {
        use std::time::Duration;

        use axum::Router;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let app = Router::new().fallback(|| async {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            "OK"
        });
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let transport = HttpPeerTransport::new(port).unwrap();
        transport
            .purge("127.0.0.1", &PagePath::new("/a"), false)
            .await
            .unwrap();
    }

    #[test]
    fn purge_url_rejects_garbage_address() {
        let err = peer_purge_url("not a host", 80, &PagePath::new("/"), false).unwrap_err();
        assert!(matches!(err, PurgeError::PeerUnreachable { .. }));
    }
}
