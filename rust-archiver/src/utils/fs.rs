//! Filesystem helpers shared across modules.
//!
//! These helpers provide consistent error context (operation + path) and keep
//! the best-effort cleanup rules for task working directories in one place.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error("creating directory", path, e))
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error(op, path, e))
}

/// Returns true when `path` is a directory with no entries.
///
/// A missing directory counts as empty.
pub fn is_dir_empty(path: &Path) -> Result<bool> {
    match std::fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(io_error("reading directory", path, e)),
    }
}

/// Remove a directory tree, logging instead of failing.
pub fn remove_dir_best_effort(path: &Path) {
    match std::fs::remove_dir_all(path) {
        Ok(()) => debug!(path = %path.display(), "Removed working directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove working directory"),
    }
}

/// Remove a directory only if it has no entries. Best-effort.
pub fn remove_dir_if_empty(path: &Path) {
    match is_dir_empty(path) {
        Ok(true) => remove_dir_best_effort(path),
        Ok(false) => debug!(path = %path.display(), "Keeping non-empty working directory"),
        Err(e) => warn!(error = %e, "Failed to inspect working directory"),
    }
}

/// Move a file into `dest_dir`, falling back to copy + remove when a plain
/// rename is not possible (e.g. across filesystems).
///
/// Returns the destination path.
pub async fn move_file(src: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let file_name = src
        .file_name()
        .ok_or_else(|| Error::Other(format!("not a file path: {}", src.display())))?;
    let dest = dest_dir.join(file_name);

    if tokio::fs::rename(src, &dest).await.is_ok() {
        return Ok(dest);
    }

    debug!(
        src = %src.display(),
        dest = %dest.display(),
        "Rename failed, falling back to copy"
    );
    tokio::fs::copy(src, &dest)
        .await
        .map_err(|e| io_error("copying file", &dest, e))?;
    tokio::fs::remove_file(src)
        .await
        .map_err(|e| io_error("removing file", src, e))?;

    Ok(dest)
}
