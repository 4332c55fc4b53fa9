//! Job dispatcher for the download manager's watched folder
//!
//! Converts a dispatch job into a `.crawljob` descriptor, the flat key/value
//! format the download manager's folder-watch feature consumes. Descriptors
//! are written to a temp file and renamed into place so the watcher never
//! observes a partial file.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

/// One job handed to the download manager: resolved direct links plus a
/// package name for its queue.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub name: String,
    pub links: Vec<String>,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("refusing job name that escapes the watch folder: {0:?}")]
    UnsafeName(String),

    #[error("failed to write job descriptor {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Writes job descriptors into the download manager's watched folder.
pub struct Dispatcher {
    watch_folder: PathBuf,
    download_folder: PathBuf,
}

impl Dispatcher {
    /// `download_folder` is where the download manager is told to place the
    /// finished files; normally the organizer's staging folder.
    pub fn new(watch_folder: impl Into<PathBuf>, download_folder: impl Into<PathBuf>) -> Self {
        Self {
            watch_folder: watch_folder.into(),
            download_folder: download_folder.into(),
        }
    }

    /// Write `job` as an atomic `.crawljob` descriptor. Returns the final
    /// descriptor path. Failures are reported, not retried; the caller's
    /// ledger stays untouched so the item retries on the next poll.
    pub async fn dispatch(&self, job: &DispatchJob) -> Result<PathBuf, DispatchError> {
        let safe_name = {
            let sanitized = sanitize_filename::sanitize(&job.name);
            if sanitized.is_empty() {
                warn!(job = "dispatcher", name = %job.name, "Job name sanitized to nothing, using fallback");
                "unnamed_download".to_string()
            } else {
                sanitized
            }
        };

        let target = self.watch_folder.join(format!("{safe_name}.crawljob"));
        // sanitize() strips separators already; keep the containment check anyway
        if target.parent() != Some(self.watch_folder.as_path()) {
            return Err(DispatchError::UnsafeName(job.name.clone()));
        }

        // The download manager reads the two-character sequence \n as a link
        // separator inside the text value, and booleans as uppercase words.
        let links = job.links.join("\\n");
        let content = format!(
            "text={links}\n\
             packageName={safe_name}\n\
             downloadFolder={}\n\
             autoStart=TRUE\n\
             forcedStart=TRUE\n",
            self.download_folder.display()
        );

        let tmp = self.watch_folder.join(format!(".{safe_name}.crawljob.tmp"));
        write_file(&tmp, &content).await?;
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|source| DispatchError::Write {
                path: target.clone(),
                source,
            })?;

        info!(
            job = "dispatcher",
            package = %safe_name,
            links = job.links.len(),
            descriptor = %target.display(),
            "Wrote job descriptor"
        );
        Ok(target)
    }
}

async fn write_file(path: &Path, content: &str) -> Result<(), DispatchError> {
    tokio::fs::write(path, content)
        .await
        .map_err(|source| DispatchError::Write {
            path: path.to_path_buf(),
            source,
        })
}
