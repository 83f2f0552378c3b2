use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use netmodel::{Directory, DirectoryError, NetId, Network};
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

/// Default timeout for directory requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// [`Directory`] served over HTTP with JSON bodies.
///
/// - `GET {base}/networks/{id}` returns a [`Network`]
/// - `GET {base}/networks/{node_id}/versions` returns `{ "<net id>": version }`
#[derive(Clone)]
pub struct HttpDirectory {
    client: Client,
    base_url: String,
    base: Url,
}

impl HttpDirectory {
    pub fn new(base_url: &str) -> Result<Self, DirectoryError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, DirectoryError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DirectoryError::Unavailable(format!("http client: {e}")))?;
        let base_url = base_url.trim_end_matches('/').to_string();
        let base = Url::parse(&base_url)
            .map_err(|e| DirectoryError::Unavailable(format!("directory url {base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(DirectoryError::Unavailable(format!(
                "directory url {base_url}: not a base url"
            )));
        }
        info!(base_url = %base_url, "directory client initialized");
        Ok(Self {
            client,
            base_url,
            base,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Base url extended by `segments`, each percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, DirectoryError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                DirectoryError::Unavailable(format!("directory url {}: not a base url", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Issue a GET. Returns `Ok(None)` on 404.
    async fn get(&self, url: Url) -> Result<Option<Response>, DirectoryError> {
        let path = url.path().to_string();
        debug!(url = %url, "directory request");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DirectoryError::Unavailable(format!("GET {path}: {e}")))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DirectoryError::Unavailable(format!(
                "GET {path} {status}: {body}"
            )));
        }
        Ok(Some(resp))
    }

    async fn decode<T: DeserializeOwned>(path: &str, resp: Response) -> Result<T, DirectoryError> {
        resp.json()
            .await
            .map_err(|e| DirectoryError::Decode(format!("GET {path}: {e}")))
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn get_network(&self, id: &NetId) -> Result<Network, DirectoryError> {
        let url = self.url(&["networks", id.as_str()])?;
        let path = url.path().to_string();
        match self.get(url).await? {
            Some(resp) => Self::decode(&path, resp).await,
            None => Err(DirectoryError::NotFound(id.clone())),
        }
    }

    async fn networks_version(
        &self,
        node_id: &str,
    ) -> Result<HashMap<NetId, u32>, DirectoryError> {
        let url = self.url(&["networks", node_id, "versions"])?;
        let path = url.path().to_string();
        match self.get(url).await? {
            Some(resp) => Self::decode(&path, resp).await,
            // The directory does not know the node yet: it has no networks.
            None => Ok(HashMap::new()),
        }
    }
}
