//! Metadata manager client (Radarr/Sonarr-style v3 API)
//!
//! The movie and TV managers speak the same protocol; one [`ArrClient`] is
//! constructed per kind. Movie lookups additionally reconcile with the
//! manager's library, adding the movie when it is not tracked yet so the
//! import scan has something to import into.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::{ApiError, status_error};

/// Which library a manager instance fronts; decides endpoint names and the
/// import command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerKind {
    Movie,
    Tv,
}

impl ManagerKind {
    pub fn service_name(self) -> &'static str {
        match self {
            Self::Movie => "movie manager",
            Self::Tv => "tv manager",
        }
    }

    fn scan_command(self) -> &'static str {
        match self {
            Self::Movie => "DownloadedMoviesScan",
            Self::Tv => "DownloadedEpisodesScan",
        }
    }
}

/// What the organizer asks a manager to resolve.
#[derive(Debug, Clone)]
pub enum LookupHint {
    Movie { title: String, year: Option<u32> },
    Series { show: String },
}

impl LookupHint {
    pub fn term(&self) -> String {
        match self {
            Self::Movie {
                title,
                year: Some(year),
            } => format!("{title} {year}"),
            Self::Movie { title, year: None } => title.clone(),
            Self::Series { show } => show.clone(),
        }
    }
}

/// Canonical naming for a matched entry.
#[derive(Debug, Clone)]
pub struct LookupMatch {
    pub title: String,
    pub year: Option<u32>,
    /// Folder name the manager itself would use, when it declares one
    pub folder_name: Option<String>,
}

/// Metadata manager seam: title lookup, root folders, import trigger.
#[async_trait]
pub trait LibraryManager: Send + Sync {
    async fn lookup(&self, hint: &LookupHint) -> Result<Option<LookupMatch>, ApiError>;
    async fn root_folders(&self) -> Result<Vec<String>, ApiError>;
    async fn trigger_scan(&self) -> Result<(), ApiError>;
}

/// v3 API client for one metadata manager instance
pub struct ArrClient {
    kind: ManagerKind,
    base_url: String,
    api_key: String,
    /// Root folder path as the manager knows it; used when adding movies
    root_folder: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct MovieResource {
    title: String,
    year: Option<u32>,
    #[serde(rename = "tmdbId")]
    tmdb_id: Option<u64>,
    #[serde(rename = "titleSlug")]
    title_slug: Option<String>,
    #[serde(default)]
    images: Option<Value>,
    #[serde(rename = "folderName")]
    folder_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeriesResource {
    title: String,
    year: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RootFolderResource {
    path: String,
}

#[derive(Debug, Deserialize)]
struct QualityProfileResource {
    id: u64,
    name: String,
}

impl ArrClient {
    pub fn new(kind: ManagerKind, base_url: String, api_key: String, root_folder: String) -> Self {
        Self {
            kind,
            base_url,
            api_key,
            root_folder,
            client: Client::new(),
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let service = self.kind.service_name();
        let url = format!("{}/api/v3/{path}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .query(query)
            .send()
            .await
            .map_err(|source| ApiError::Transport { service, source })?;
        if !resp.status().is_success() {
            return Err(status_error(service, resp).await);
        }
        resp.json()
            .await
            .map_err(|source| ApiError::Transport { service, source })
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, ApiError> {
        let service = self.kind.service_name();
        let url = format!("{}/api/v3/{path}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("X-Api-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|source| ApiError::Transport { service, source })?;
        if !resp.status().is_success() {
            return Err(status_error(service, resp).await);
        }
        resp.json()
            .await
            .map_err(|source| ApiError::Transport { service, source })
    }

    /// Movies: find the canonical record, adding the movie to the manager
    /// when it is not tracked yet. The manager's declared folder name is the
    /// authoritative naming for the library entry.
    async fn lookup_movie(&self, term: String) -> Result<Option<LookupMatch>, ApiError> {
        let results: Vec<MovieResource> =
            self.get("movie/lookup", &[("term", term)]).await?;
        let Some(candidate) = results.into_iter().next() else {
            return Ok(None);
        };

        let resolved = match candidate.tmdb_id {
            Some(tmdb_id) => {
                let existing: Vec<MovieResource> = self
                    .get("movie", &[("tmdbId", tmdb_id.to_string())])
                    .await?;
                match existing.into_iter().next() {
                    Some(movie) => {
                        debug!(
                            manager = self.kind.service_name(),
                            title = %movie.title,
                            "Movie already tracked"
                        );
                        movie
                    }
                    None => self.add_movie(candidate).await?,
                }
            }
            None => candidate,
        };

        Ok(Some(LookupMatch {
            folder_name: resolved
                .folder_name
                .as_deref()
                .and_then(basename)
                .map(str::to_string),
            title: resolved.title,
            year: resolved.year,
        }))
    }

    /// `POST /movie` with the first matching quality profile, preferring one
    /// whose name mentions 1080p.
    async fn add_movie(&self, candidate: MovieResource) -> Result<MovieResource, ApiError> {
        let profiles: Vec<QualityProfileResource> =
            self.get("qualityprofile", &[]).await?;
        let Some(profile_id) = profiles
            .iter()
            .find(|p| p.name.contains("1080p"))
            .or_else(|| profiles.first())
            .map(|p| p.id)
        else {
            return Err(ApiError::ConfigurationMismatch(format!(
                "{} has no quality profiles configured",
                self.kind.service_name()
            )));
        };

        info!(
            manager = self.kind.service_name(),
            title = %candidate.title,
            "Adding movie to manager"
        );
        let payload = json!({
            "title": candidate.title,
            "year": candidate.year,
            "qualityProfileId": profile_id,
            "titleSlug": candidate.title_slug,
            "images": candidate.images.unwrap_or_else(|| json!([])),
            "tmdbId": candidate.tmdb_id,
            "rootFolderPath": self.root_folder,
            "monitored": true,
            "addOptions": { "searchForMovie": false },
        });
        self.post("movie", &payload).await
    }

    async fn lookup_series(&self, term: String) -> Result<Option<LookupMatch>, ApiError> {
        let results: Vec<SeriesResource> =
            self.get("series/lookup", &[("term", term)]).await?;
        Ok(results.into_iter().next().map(|series| LookupMatch {
            title: series.title,
            year: series.year,
            folder_name: None,
        }))
    }
}

#[async_trait]
impl LibraryManager for ArrClient {
    async fn lookup(&self, hint: &LookupHint) -> Result<Option<LookupMatch>, ApiError> {
        let term = hint.term();
        debug!(manager = self.kind.service_name(), term = %term, "Looking up");
        match self.kind {
            ManagerKind::Movie => self.lookup_movie(term).await,
            ManagerKind::Tv => self.lookup_series(term).await,
        }
    }

    async fn root_folders(&self) -> Result<Vec<String>, ApiError> {
        let folders: Vec<RootFolderResource> = self.get("rootfolder", &[]).await?;
        Ok(folders.into_iter().map(|f| f.path).collect())
    }

    /// Fire the manager's import command for newly placed files. Best-effort
    /// from the organizer's point of view.
    async fn trigger_scan(&self) -> Result<(), ApiError> {
        let body = json!({ "name": self.kind.scan_command() });
        let _: Value = self.post("command", &body).await?;
        info!(
            manager = self.kind.service_name(),
            command = self.kind.scan_command(),
            "Triggered import scan"
        );
        Ok(())
    }
}

fn basename(path: &str) -> Option<&str> {
    std::path::Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_term() {
        let hint = LookupHint::Movie {
            title: "Inception".to_string(),
            year: Some(2010),
        };
        assert_eq!(hint.term(), "Inception 2010");

        let hint = LookupHint::Movie {
            title: "Inception".to_string(),
            year: None,
        };
        assert_eq!(hint.term(), "Inception");

        let hint = LookupHint::Series {
            show: "Breaking Bad".to_string(),
        };
        assert_eq!(hint.term(), "Breaking Bad");
    }

    #[test]
    fn test_scan_commands() {
        assert_eq!(ManagerKind::Movie.scan_command(), "DownloadedMoviesScan");
        assert_eq!(ManagerKind::Tv.scan_command(), "DownloadedEpisodesScan");
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("/movies/Inception (2010)"), Some("Inception (2010)"));
        assert_eq!(basename("Inception (2010)"), Some("Inception (2010)"));
    }
}
