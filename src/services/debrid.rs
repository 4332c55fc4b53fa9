//! Debrid cache service client
//!
//! Real-Debrid-compatible REST API: lists the account's cached items and
//! resolves restricted links into direct download URLs. Auth is a bearer
//! token on every request.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use tracing::debug;

use crate::error::{ApiError, status_error};

const SERVICE: &str = "debrid";

/// One item in the remote cache. Immutable once read.
#[derive(Debug, Clone)]
pub struct CacheItem {
    pub id: String,
    pub name: String,
    /// The cache service has finished fetching the content
    pub ready: bool,
    /// Restricted per-file links, resolved individually
    pub links: Vec<String>,
}

/// Remote cache service seam: list items, resolve direct links.
#[async_trait]
pub trait CacheService: Send + Sync {
    async fn list_items(&self) -> Result<Vec<CacheItem>, ApiError>;
    async fn resolve_link(&self, link: &str) -> Result<String, ApiError>;
}

/// Debrid REST client
pub struct DebridClient {
    base_url: String,
    api_key: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct TorrentEntry {
    id: String,
    filename: String,
    status: String,
    #[serde(default)]
    links: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UnrestrictResponse {
    download: String,
}

impl DebridClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            base_url,
            api_key,
            client: Client::new(),
        }
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

#[async_trait]
impl CacheService for DebridClient {
    /// `GET /torrents`. An item is ready once the service reports it fully
    /// downloaded; its `links` are populated at that point.
    async fn list_items(&self) -> Result<Vec<CacheItem>, ApiError> {
        let url = format!("{}/torrents", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header(AUTHORIZATION, self.bearer())
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                service: SERVICE,
                source,
            })?;
        if !resp.status().is_success() {
            return Err(status_error(SERVICE, resp).await);
        }

        let entries: Vec<TorrentEntry> =
            resp.json().await.map_err(|source| ApiError::Transport {
                service: SERVICE,
                source,
            })?;
        debug!(job = "debrid", items = entries.len(), "Listed cache items");

        Ok(entries
            .into_iter()
            .map(|t| CacheItem {
                id: t.id,
                name: t.filename,
                ready: t.status == "downloaded",
                links: t.links,
            })
            .collect())
    }

    /// `POST /unrestrict/link` with a form body; returns the direct URL.
    async fn resolve_link(&self, link: &str) -> Result<String, ApiError> {
        let url = format!("{}/unrestrict/link", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header(AUTHORIZATION, self.bearer())
            .form(&[("link", link)])
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                service: SERVICE,
                source,
            })?;
        if !resp.status().is_success() {
            return Err(status_error(SERVICE, resp).await);
        }

        let body: UnrestrictResponse =
            resp.json().await.map_err(|source| ApiError::Transport {
                service: SERVICE,
                source,
            })?;
        Ok(body.download)
    }
}
