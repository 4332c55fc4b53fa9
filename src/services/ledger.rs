//! Persisted dedup ledger for dispatched cache items
//!
//! Maps cache item id to the time it was dispatched. An id present in the
//! ledger is never re-dispatched. The ledger only grows; the domain is
//! small-scale personal use and eviction is not needed.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::warn;

/// Set of already-dispatched cache item identifiers, persisted as JSON.
pub struct DedupLedger {
    path: PathBuf,
    entries: HashMap<String, DateTime<Utc>>,
}

impl DedupLedger {
    /// Load the ledger from `path`. A missing file starts empty; a corrupt or
    /// unreadable file also starts empty, with a warning. Worst case is a
    /// duplicate dispatch, which the download manager deduplicates itself.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Ledger file is corrupt, starting empty"
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Could not read ledger file, starting empty"
                );
                HashMap::new()
            }
        };
        Self { path, entries }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record `id` as dispatched and persist immediately. Callers must only
    /// record after the dispatch itself succeeded.
    pub async fn record(&mut self, id: &str) -> Result<()> {
        self.entries.insert(id.to_string(), Utc::now());
        self.persist().await
    }

    /// Write-then-rename so a crash mid-write never corrupts the ledger.
    async fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(&self.entries)?;
        tokio::fs::write(&tmp, &bytes)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("renaming {} into place", tmp.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_record_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");

        let mut ledger = DedupLedger::load(&path);
        assert!(ledger.is_empty());

        ledger.record("RDABC123").await.unwrap();
        assert!(ledger.contains("RDABC123"));
        assert!(!ledger.contains("RDXYZ789"));

        let reloaded = DedupLedger::load(&path);
        assert!(reloaded.contains("RDABC123"));
        assert_eq!(reloaded.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let mut ledger = DedupLedger::load(&path);
        assert!(ledger.is_empty());

        // A corrupt ledger must still be writable afterwards
        ledger.record("RDABC123").await.unwrap();
        assert!(DedupLedger::load(&path).contains("RDABC123"));
    }

    #[tokio::test]
    async fn test_missing_parent_directory_is_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("ledger.json");

        let mut ledger = DedupLedger::load(&path);
        ledger.record("RDABC123").await.unwrap();
        assert!(path.exists());
    }
}
