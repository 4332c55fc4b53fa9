//! Application configuration management
//!
//! Configuration is a read-only snapshot taken at startup; changing a value
//! requires a restart. Missing required variables fail startup immediately
//! rather than at first use.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use url::Url;

/// Connection details for one metadata manager (movie or TV).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Base URL, e.g. `http://localhost:7878`
    pub url: String,

    /// API key sent as `X-Api-Key`
    pub api_key: String,

    /// Root folder exactly as the manager has it configured; import triggers
    /// are rejected when this does not match
    pub root_folder: String,

    /// Local path this process moves entries into (may differ from
    /// `root_folder` when the manager sees the library through a mount)
    pub library_path: PathBuf,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Debrid cache service bearer token
    pub debrid_api_key: String,

    /// Debrid cache service base URL
    pub debrid_api_url: String,

    /// Download manager's watched folder (job descriptor drop target)
    pub watch_folder: PathBuf,

    /// Folder where completed downloads land before organization
    pub staging_folder: PathBuf,

    /// Path of the persisted dedup ledger
    pub ledger_path: PathBuf,

    /// Cache watcher poll interval
    pub poll_interval: Duration,

    /// Movie metadata manager
    pub movie_manager: ManagerConfig,

    /// TV metadata manager; TV entries are skipped when absent
    pub tv_manager: Option<ManagerConfig>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // An empty value falls back to the default
        let poll_interval = match env::var("POLL_INTERVAL_SECONDS") {
            Ok(v) if !v.is_empty() => {
                Duration::from_secs(v.parse().context("Invalid POLL_INTERVAL_SECONDS")?)
            }
            _ => Duration::from_secs(60),
        };

        let movie_manager = ManagerConfig {
            url: base_url("MOVIE_MANAGER_URL")?,
            api_key: required("MOVIE_MANAGER_API_KEY")?,
            root_folder: required("MOVIE_MANAGER_ROOT")?,
            library_path: PathBuf::from(required("MOVIE_LIBRARY_PATH")?),
        };

        // The TV manager is optional, but only as a whole group
        const TV_VARS: [&str; 4] = [
            "TV_MANAGER_URL",
            "TV_MANAGER_API_KEY",
            "TV_MANAGER_ROOT",
            "TV_LIBRARY_PATH",
        ];
        let tv_set = TV_VARS
            .iter()
            .filter(|v| env::var(v).map(|s| !s.is_empty()).unwrap_or(false))
            .count();
        let tv_manager = match tv_set {
            0 => None,
            4 => Some(ManagerConfig {
                url: base_url("TV_MANAGER_URL")?,
                api_key: required("TV_MANAGER_API_KEY")?,
                root_folder: required("TV_MANAGER_ROOT")?,
                library_path: PathBuf::from(required("TV_LIBRARY_PATH")?),
            }),
            _ => bail!(
                "TV manager configuration is incomplete: set all of {} or none",
                TV_VARS.join(", ")
            ),
        };

        Ok(Self {
            debrid_api_key: required("DEBRID_API_KEY")?,

            debrid_api_url: match env::var("DEBRID_API_URL") {
                Ok(v) if !v.is_empty() => validated_url("DEBRID_API_URL", &v)?,
                _ => "https://api.real-debrid.com/rest/1.0".to_string(),
            },

            watch_folder: PathBuf::from(required("WATCH_FOLDER")?),

            staging_folder: PathBuf::from(required("STAGING_FOLDER")?),

            ledger_path: env::var("LEDGER_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/processed_items.json")),

            poll_interval,

            movie_manager,

            tv_manager,
        })
    }
}

fn required(name: &'static str) -> Result<String> {
    let value = env::var(name).with_context(|| format!("{name} is required"))?;
    if value.is_empty() {
        bail!("{name} is required");
    }
    Ok(value)
}

fn base_url(name: &'static str) -> Result<String> {
    let raw = required(name)?;
    validated_url(name, &raw)
}

/// Parse the URL to reject typos at startup, then store it as a string with
/// no trailing slash so paths can be appended directly.
fn validated_url(name: &'static str, raw: &str) -> Result<String> {
    Url::parse(raw).with_context(|| format!("{name} is not a valid URL: {raw:?}"))?;
    Ok(raw.trim_end_matches('/').to_string())
}
