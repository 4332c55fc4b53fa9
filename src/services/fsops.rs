//! Filesystem moves for the organizer
//!
//! A move is a rename when source and destination share a filesystem, and
//! copy-then-delete otherwise. The source is removed only after the
//! destination is confirmed present; a failed copy leaves the source intact.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FsError {
    /// Includes the effective identity the process runs under, to point the
    /// operator at the permission fix.
    #[error("permission denied {op} {path} (running as {user})")]
    Permission {
        op: &'static str,
        path: PathBuf,
        user: String,
        #[source]
        source: io::Error,
    },

    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("destination {0} missing after copy; source left in place")]
    Unverified(PathBuf),
}

/// Move `src` to `dst`, creating intermediate directories as needed.
pub async fn move_entry(src: &Path, dst: &Path) -> Result<(), FsError> {
    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| classify_io("creating", parent, e))?;
    }

    match tokio::fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            debug!(
                src = %src.display(),
                dst = %dst.display(),
                "Cross-filesystem move, falling back to copy"
            );
            copy_then_delete(src, dst).await
        }
        Err(e) => Err(classify_io("moving", src, e)),
    }
}

fn is_cross_device(err: &io::Error) -> bool {
    // Covers EXDEV on unix and ERROR_NOT_SAME_DEVICE on windows
    err.kind() == io::ErrorKind::CrossesDevices
}

async fn copy_then_delete(src: &Path, dst: &Path) -> Result<(), FsError> {
    let meta = tokio::fs::metadata(src)
        .await
        .map_err(|e| classify_io("reading", src, e))?;

    if meta.is_dir() {
        copy_dir(src, dst).await?;
    } else {
        tokio::fs::copy(src, dst)
            .await
            .map_err(|e| classify_io("copying to", dst, e))?;
    }

    // Only delete the source once the destination is verified present
    if tokio::fs::metadata(dst).await.is_err() {
        return Err(FsError::Unverified(dst.to_path_buf()));
    }

    if meta.is_dir() {
        tokio::fs::remove_dir_all(src)
            .await
            .map_err(|e| classify_io("removing", src, e))?;
    } else {
        tokio::fs::remove_file(src)
            .await
            .map_err(|e| classify_io("removing", src, e))?;
    }
    Ok(())
}

fn copy_dir<'a>(
    src: &'a Path,
    dst: &'a Path,
) -> Pin<Box<dyn Future<Output = Result<(), FsError>> + Send + 'a>> {
    Box::pin(async move {
        tokio::fs::create_dir_all(dst)
            .await
            .map_err(|e| classify_io("creating", dst, e))?;

        let mut entries = tokio::fs::read_dir(src)
            .await
            .map_err(|e| classify_io("reading", src, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| classify_io("reading", src, e))?
        {
            let from = entry.path();
            let to = dst.join(entry.file_name());
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| classify_io("reading", &from, e))?;
            if file_type.is_dir() {
                copy_dir(&from, &to).await?;
            } else {
                tokio::fs::copy(&from, &to)
                    .await
                    .map_err(|e| classify_io("copying to", &to, e))?;
            }
        }
        Ok(())
    })
}

fn classify_io(op: &'static str, path: &Path, source: io::Error) -> FsError {
    if source.kind() == io::ErrorKind::PermissionDenied {
        FsError::Permission {
            op,
            path: path.to_path_buf(),
            user: effective_user(),
            source,
        }
    } else {
        FsError::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

fn effective_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
