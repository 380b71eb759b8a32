//! Peer discovery against a fake orchestration API, and purge delivery to a
//! fake peer.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use reqwest::Client;
use serde_json::json;
use url::Url;

use fleetcache::cache::{PageCache, PagePath, PurgeCoordinator, PurgeOptions};
use fleetcache::peers::{
    DirectoryState, HttpPeerTransport, KubernetesPeerSource, PeerDirectory, PeerError, pods_url,
};

const TOKEN: &str = "service-account-token";

async fn spawn(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    addr
}

async fn list_pods(
    Path(namespace): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let expected = format!("Bearer {TOKEN}");
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        == Some(expected.as_str());
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if namespace != "fleet" || query.as_deref() != Some("labelSelector=app%3Dfleetcache") {
        return StatusCode::NOT_FOUND.into_response();
    }

    Json(json!({
        "kind": "PodList",
        "items": [
            { "metadata": { "name": "web-0" }, "status": { "podIP": "10.0.0.12" } },
            { "metadata": { "name": "web-1" }, "status": { "podIP": "10.0.0.11" } },
            { "metadata": { "name": "web-2" }, "status": { "phase": "Pending" } },
            { "metadata": { "name": "web-3" }, "status": { "podIP": "10.0.0.13" } }
        ]
    }))
    .into_response()
}

async fn spawn_api() -> Url {
    let app = Router::new().route("/api/v1/namespaces/{namespace}/pods", get(list_pods));
    let addr = spawn(app).await;
    Url::parse(&format!("http://{addr}")).expect("api url")
}

fn source(api: &Url, token: &str) -> KubernetesPeerSource {
    let url = pods_url(api, "fleet", "app=fleetcache").expect("pods url");
    KubernetesPeerSource::new(Client::new(), url, token)
}

#[tokio::test]
async fn refresh_lists_addressable_pods() {
    let api = spawn_api().await;
    let directory = PeerDirectory::new(Some("10.0.0.13".to_string()));

    let count = directory
        .refresh(&source(&api, TOKEN))
        .await
        .expect("refresh succeeds");

    assert_eq!(count, 2);
    assert_eq!(
        directory.current_peers().to_vec(),
        vec!["10.0.0.11".to_string(), "10.0.0.12".to_string()]
    );
}

#[tokio::test]
async fn rejected_refresh_keeps_previous_snapshot() {
    let api = spawn_api().await;
    let directory = PeerDirectory::new(None);
    directory.replace(vec!["10.0.0.99".to_string()]);

    let err = directory
        .refresh(&source(&api, "wrong-token"))
        .await
        .expect_err("unauthorized refresh fails");

    assert!(matches!(err, PeerError::RefreshFailed { .. }));
    assert_eq!(
        directory.current_peers().to_vec(),
        vec!["10.0.0.99".to_string()]
    );
}

#[tokio::test]
async fn directory_without_credentials_stays_uninitialized() {
    let directory = Arc::new(PeerDirectory::new(None));
    let cache = Arc::new(PageCache::default());
    let transport = Arc::new(HttpPeerTransport::with_client(Client::new(), 1));
    let coordinator = PurgeCoordinator::new(cache, Arc::clone(&directory), transport);

    let summary = coordinator
        .purge(
            &PagePath::new("/blog"),
            PurgeOptions {
                prevent_cache: false,
                recursive: true,
            },
        )
        .await
        .expect("purge without peers succeeds");

    assert_eq!(directory.state(), DirectoryState::Uninitialized);
    assert_eq!(summary.peers_purged, 0);
}

#[derive(Clone, Default)]
struct PeerLog {
    received: Arc<Mutex<Vec<String>>>,
}

async fn record_purge(State(log): State<PeerLog>, uri: axum::http::Uri) -> &'static str {
    log.received
        .lock()
        .expect("peer log lock")
        .push(uri.to_string());
    "OK"
}

#[tokio::test]
async fn fan_out_delivers_local_only_purge_to_peer() {
    let log = PeerLog::default();
    let peer = spawn(Router::new().fallback(record_purge).with_state(log.clone())).await;

    let directory = Arc::new(PeerDirectory::new(None));
    directory.replace(vec!["127.0.0.1".to_string()]);
    let transport = Arc::new(HttpPeerTransport::with_client(Client::new(), peer.port()));
    let coordinator =
        PurgeCoordinator::new(Arc::new(PageCache::default()), directory, transport);

    let summary = coordinator
        .purge(
            &PagePath::new("/blog/post"),
            PurgeOptions {
                prevent_cache: true,
                recursive: true,
            },
        )
        .await
        .expect("purge succeeds");

    assert_eq!(summary.peers_purged, 1);
    assert_eq!(
        log.received.lock().expect("peer log lock").as_slice(),
        ["/blog/post?purge=1&edit=1".to_string()]
    );
}

#[tokio::test]
async fn unreachable_peer_reports_address() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let closed = listener.local_addr().expect("local addr");
    drop(listener);

    let directory = Arc::new(PeerDirectory::new(None));
    directory.replace(vec!["127.0.0.1".to_string()]);
    let transport = Arc::new(HttpPeerTransport::with_client(Client::new(), closed.port()));
    let coordinator =
        PurgeCoordinator::new(Arc::new(PageCache::default()), directory, transport);

    let err = coordinator
        .purge(
            &PagePath::new("/"),
            PurgeOptions {
                prevent_cache: false,
                recursive: true,
            },
        )
        .await
        .expect_err("unreachable peer fails the purge");

    assert_eq!(err.peer(), "127.0.0.1");
}
