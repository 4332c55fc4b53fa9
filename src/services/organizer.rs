//! Staging organizer
//!
//! One run is one pass over the staging folder: classify each entry,
//! reconcile the name against the matching metadata manager, move the entry
//! into the library layout, and finally ask the affected managers to import.
//!
//! Entries are processed one at a time; an entry is fully resolved before
//! the next is started, and cancellation is checked between entries, never
//! mid-move. Unmatched or unrecognized entries are left in place for manual
//! handling — the organizer never deletes anything it did not move itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::ApiError;
use crate::services::arr::{LibraryManager, LookupHint, LookupMatch, ManagerKind};
use crate::services::classifier::{MediaVerdict, classify};
use crate::services::fsops;
use crate::services::manager::{ManagedTask, RunSummary, TaskContext};

/// Outcome for a single staging entry.
#[derive(Debug)]
pub enum OrganizeOutcome {
    Moved(PathBuf),
    Skipped(String),
    Failed(String),
}

/// One metadata manager plus where this process physically writes its
/// library. `declared_root` must exactly match a root folder configured in
/// the manager or its import command is rejected.
pub struct ManagerTarget {
    pub manager: Arc<dyn LibraryManager>,
    pub kind: ManagerKind,
    pub library_path: PathBuf,
    pub declared_root: String,
}

/// Scans the staging folder and files entries into their libraries.
pub struct Organizer {
    staging: PathBuf,
    movies: ManagerTarget,
    tv: Option<ManagerTarget>,
}

impl Organizer {
    pub fn new(staging: impl Into<PathBuf>, movies: ManagerTarget, tv: Option<ManagerTarget>) -> Self {
        Self {
            staging: staging.into(),
            movies,
            tv,
        }
    }

    /// One organize pass. Errors are absorbed into the summary; the caller
    /// decides whether to surface them.
    pub async fn organize(&self, cancel: &CancellationToken) -> RunSummary {
        // Pre-flight: a root-folder mismatch would strand files after the
        // move, so the whole run refuses to start instead
        for target in [Some(&self.movies), self.tv.as_ref()].into_iter().flatten() {
            if let Err(e) = preflight(target).await {
                error!(job = "organizer", error = %e, "Pre-flight check failed");
                return RunSummary {
                    processed: 0,
                    skipped: 0,
                    error: Some(e.to_string()),
                    completed_at: Utc::now(),
                };
            }
        }

        let entries = match self.staging_entries().await {
            Ok(entries) => entries,
            Err(e) => {
                error!(job = "organizer", staging = %self.staging.display(), error = %e, "Could not read staging folder");
                return RunSummary {
                    processed: 0,
                    skipped: 0,
                    error: Some(format!("reading {}: {e}", self.staging.display())),
                    completed_at: Utc::now(),
                };
            }
        };
        info!(job = "organizer", entries = entries.len(), "Starting organize pass");

        let mut processed = 0;
        let mut skipped = 0;
        let mut run_error: Option<String> = None;
        let mut affected: Vec<ManagerKind> = Vec::new();

        for entry in &entries {
            if cancel.is_cancelled() {
                info!(job = "organizer", "Cancelled; stopping before next entry");
                break;
            }
            let (outcome, kind) = self.process_entry(entry).await;
            match outcome {
                OrganizeOutcome::Moved(dest) => {
                    processed += 1;
                    info!(job = "organizer", entry = %entry.name, dest = %dest.display(), "Organized");
                    if let Some(kind) = kind {
                        if !affected.contains(&kind) {
                            affected.push(kind);
                        }
                    }
                }
                OrganizeOutcome::Skipped(reason) => {
                    skipped += 1;
                    warn!(job = "organizer", entry = %entry.name, reason = %reason, "Skipped");
                }
                OrganizeOutcome::Failed(reason) => {
                    skipped += 1;
                    error!(job = "organizer", entry = %entry.name, error = %reason, "Failed");
                    if run_error.is_none() {
                        run_error = Some(format!("{}: {reason}", entry.name));
                    }
                }
            }
        }

        // Import triggers are best-effort: the move is the source of truth
        for kind in affected {
            let target = match kind {
                ManagerKind::Movie => Some(&self.movies),
                ManagerKind::Tv => self.tv.as_ref(),
            };
            if let Some(target) = target {
                if let Err(e) = target.manager.trigger_scan().await {
                    warn!(
                        job = "organizer",
                        manager = kind.service_name(),
                        error = %e,
                        "Import trigger failed; moved files remain in place"
                    );
                }
            }
        }

        info!(job = "organizer", processed, skipped, "Organize pass complete");
        RunSummary {
            processed,
            skipped,
            error: run_error,
            completed_at: Utc::now(),
        }
    }

    async fn process_entry(&self, entry: &StagingEntry) -> (OrganizeOutcome, Option<ManagerKind>) {
        match classify(&entry.name, entry.is_dir) {
            MediaVerdict::Unknown => (OrganizeOutcome::Skipped("unrecognized".to_string()), None),
            MediaVerdict::Movie { title, year } => self.place_movie(entry, title, year).await,
            MediaVerdict::Episode { show, season, .. } => {
                self.place_tv(entry, show, season, true).await
            }
            MediaVerdict::SeasonPack { show, season } => {
                self.place_tv(entry, show, season, false).await
            }
        }
    }

    async fn place_movie(
        &self,
        entry: &StagingEntry,
        title: String,
        year: Option<u32>,
    ) -> (OrganizeOutcome, Option<ManagerKind>) {
        let target = &self.movies;
        let matched = match resolve(target, &LookupHint::Movie { title, year }).await {
            Ok(matched) => matched,
            Err(outcome) => return (outcome, Some(target.kind)),
        };

        let movie_dir = target.library_path.join(canonical_folder(&matched));
        let dest = if entry.is_dir {
            movie_dir
        } else {
            movie_dir.join(&entry.name)
        };
        (move_to(&entry.path, dest).await, Some(target.kind))
    }

    async fn place_tv(
        &self,
        entry: &StagingEntry,
        show: String,
        season: u32,
        into_season_dir: bool,
    ) -> (OrganizeOutcome, Option<ManagerKind>) {
        let Some(target) = &self.tv else {
            return (
                OrganizeOutcome::Skipped("no tv manager configured".to_string()),
                None,
            );
        };
        let matched = match resolve(target, &LookupHint::Series { show }).await {
            Ok(matched) => matched,
            Err(outcome) => return (outcome, Some(target.kind)),
        };

        let season_dir = target
            .library_path
            .join(canonical_folder(&matched))
            .join(format!("Season {season:02}"));
        let dest = if into_season_dir {
            // Single episode: file (or folder) goes inside the season folder
            season_dir.join(&entry.name)
        } else {
            // Season pack: the whole directory becomes the season folder
            season_dir
        };
        (move_to(&entry.path, dest).await, Some(target.kind))
    }

    /// Top-level staging entries in stable name order.
    async fn staging_entries(&self) -> std::io::Result<Vec<StagingEntry>> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.staging).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().await?.is_dir();
            entries.push(StagingEntry {
                path: entry.path(),
                name,
                is_dir,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

/// A file or directory sitting in the staging folder.
struct StagingEntry {
    name: String,
    path: PathBuf,
    is_dir: bool,
}

async fn preflight(target: &ManagerTarget) -> Result<(), ApiError> {
    let roots = target.manager.root_folders().await?;
    if !roots.iter().any(|r| r == &target.declared_root) {
        return Err(ApiError::ConfigurationMismatch(format!(
            "{} root folder {:?} is not configured in the manager; valid roots: {:?}",
            target.kind.service_name(),
            target.declared_root,
            roots
        )));
    }
    Ok(())
}

/// Map a lookup result to either a match or a per-entry outcome. Transient
/// failures become Failed (retried next run); auth and configuration errors
/// become Skipped until the operator intervenes.
async fn resolve(
    target: &ManagerTarget,
    hint: &LookupHint,
) -> Result<LookupMatch, OrganizeOutcome> {
    match target.manager.lookup(hint).await {
        Ok(Some(matched)) => Ok(matched),
        Ok(None) => Err(OrganizeOutcome::Skipped("no library match".to_string())),
        Err(e) if e.is_transient() => Err(OrganizeOutcome::Failed(e.to_string())),
        Err(e) => Err(OrganizeOutcome::Skipped(e.to_string())),
    }
}

async fn move_to(src: &Path, dest: PathBuf) -> OrganizeOutcome {
    if tokio::fs::metadata(&dest).await.is_ok() {
        // Never clobber or delete on a collision; leave both for the operator
        return OrganizeOutcome::Skipped("destination already exists".to_string());
    }
    match fsops::move_entry(src, &dest).await {
        Ok(()) => OrganizeOutcome::Moved(dest),
        Err(e) => OrganizeOutcome::Failed(e.to_string()),
    }
}

/// The folder a matched entry lives under: the manager's declared folder
/// name when it has one, otherwise "Title (Year)".
fn canonical_folder(matched: &LookupMatch) -> String {
    let raw = match (&matched.folder_name, matched.year) {
        (Some(folder), _) => folder.clone(),
        (None, Some(year)) => format!("{} ({year})", matched.title),
        (None, None) => matched.title.clone(),
    };
    sanitize_filename::sanitize(&raw)
}

#[async_trait]
impl ManagedTask for Organizer {
    fn name(&self) -> &'static str {
        "organizer"
    }

    /// The organizer is on-demand: one pass per start, then the task ends.
    async fn run(&self, ctx: TaskContext) -> anyhow::Result<()> {
        let summary = self.organize(&ctx.cancel).await;
        ctx.record_run(summary);
        Ok(())
    }

    async fn run_once(&self, ctx: TaskContext) -> anyhow::Result<RunSummary> {
        Ok(self.organize(&ctx.cancel).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_folder() {
        let matched = LookupMatch {
            title: "Inception".to_string(),
            year: Some(2010),
            folder_name: None,
        };
        assert_eq!(canonical_folder(&matched), "Inception (2010)");

        let matched = LookupMatch {
            title: "Inception".to_string(),
            year: Some(2010),
            folder_name: Some("Inception (2010) [imdb-tt1375666]".to_string()),
        };
        assert_eq!(canonical_folder(&matched), "Inception (2010) [imdb-tt1375666]");

        let matched = LookupMatch {
            title: "Alien: Covenant".to_string(),
            year: None,
            folder_name: None,
        };
        // Characters the filesystem rejects are stripped
        assert_eq!(canonical_folder(&matched), "Alien Covenant");
    }
}
