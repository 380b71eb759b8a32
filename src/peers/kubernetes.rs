//! Kubernetes pod listing as a [`PeerSource`].
//!
//! Lists pods matching the service's label selector through the API server,
//! authenticating with the service-account bearer token. The API server
//! certificate is verified against the cluster CA bundle.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Certificate, Client, StatusCode, Url, header};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PeerSettings;

use super::directory::{PeerDirectory, PeerSource, PollSchedule};
use super::error::PeerError;

const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    #[serde(default)]
    status: Option<PodStatus>,
}

#[derive(Debug, Deserialize)]
struct PodStatus {
    #[serde(rename = "podIP", default)]
    pod_ip: Option<String>,
}

pub struct KubernetesPeerSource {
    client: Client,
    pods_url: Url,
    token: String,
}

impl KubernetesPeerSource {
    pub fn new(client: Client, pods_url: Url, token: impl Into<String>) -> Self {
        Self {
            client,
            pods_url,
            token: token.into(),
        }
    }

    /// Build a source from the mounted service-account files.
    ///
    /// A missing token yields [`PeerError::CredentialUnavailable`]; a token
    /// without a usable CA bundle is a configuration error.
    pub fn from_settings(settings: &PeerSettings) -> Result<Self, PeerError> {
        let token = read_token(&settings.token_path)?;

        let ca_pem = fs::read(&settings.ca_path).map_err(|err| PeerError::InvalidCaBundle {
            path: settings.ca_path.clone(),
            message: err.to_string(),
        })?;
        let certificate =
            Certificate::from_pem(&ca_pem).map_err(|err| PeerError::InvalidCaBundle {
                path: settings.ca_path.clone(),
                message: err.to_string(),
            })?;

        let client = Client::builder()
            .user_agent(concat!("fleetcache/", env!("CARGO_PKG_VERSION")))
            .add_root_certificate(certificate)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| PeerError::client(err.to_string()))?;

        let namespace = match settings.namespace.as_deref() {
            Some(namespace) => namespace.to_string(),
            None => read_namespace(&settings.namespace_path),
        };
        let pods_url = pods_url(&settings.api_url, &namespace, &settings.label_selector)?;

        Ok(Self::new(client, pods_url, token))
    }

    pub fn pods_url(&self) -> &Url {
        &self.pods_url
    }
}

#[async_trait]
impl PeerSource for KubernetesPeerSource {
    async fn list_peers(&self) -> Result<Vec<String>, PeerError> {
        let response = self
            .client
            .get(self.pods_url.clone())
            .bearer_auth(&self.token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| PeerError::refresh_failed(format!("request failed: {err}")))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(PeerError::refresh_failed(format!(
                "orchestration API answered {status}"
            )));
        }

        let pods: PodList = response
            .json()
            .await
            .map_err(|err| PeerError::refresh_failed(format!("malformed pod list: {err}")))?;

        let total = pods.items.len();
        let addresses: Vec<String> = pods
            .items
            .into_iter()
            .filter_map(|pod| pod.status.and_then(|status| status.pod_ip))
            .filter(|ip| !ip.is_empty())
            .collect();
        debug!(
            pods = total,
            addressable = addresses.len(),
            "listed service pods"
        );

        Ok(addresses)
    }
}

/// Start polling the orchestration API for `directory`.
///
/// Without a service-account token the directory stays uninitialized and
/// purges stay local; `Ok(None)` is returned. Any other setup failure is an
/// error.
pub fn start_discovery(
    settings: &PeerSettings,
    directory: &Arc<PeerDirectory>,
) -> Result<Option<JoinHandle<()>>, PeerError> {
    let source = match KubernetesPeerSource::from_settings(settings) {
        Ok(source) => source,
        Err(err @ PeerError::CredentialUnavailable { .. }) => {
            warn!(error = %err, "peer discovery disabled; purges will not fan out");
            return Ok(None);
        }
        Err(err) => return Err(err),
    };

    info!(pods_url = %source.pods_url(), "peer discovery enabled");
    let source: Arc<dyn PeerSource> = Arc::new(source);
    Ok(directory.start_polling(source, PollSchedule::from(settings)))
}

/// `<api_url>/api/v1/namespaces/<namespace>/pods?labelSelector=<selector>`
pub fn pods_url(api_url: &Url, namespace: &str, label_selector: &str) -> Result<Url, PeerError> {
    let mut url = api_url.clone();
    url.path_segments_mut()
        .map_err(|_| PeerError::client(format!("`{api_url}` cannot be a base URL")))?
        .pop_if_empty()
        .extend(["api", "v1", "namespaces", namespace, "pods"]);
    url.query_pairs_mut()
        .clear()
        .append_pair("labelSelector", label_selector);
    Ok(url)
}

fn read_token(path: &Path) -> Result<String, PeerError> {
    let raw = fs::read_to_string(path).map_err(|source| PeerError::CredentialUnavailable {
        path: path.to_path_buf(),
        source,
    })?;

    let token = raw.trim();
    if token.is_empty() {
        return Err(PeerError::CredentialUnavailable {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, "token file is empty"),
        });
    }
    Ok(token.to_string())
}

fn read_namespace(path: &Path) -> String {
    fs::read_to_string(path)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|namespace| !namespace.is_empty())
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
}
