// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Crash-safe commit of a finished transfer.
//!
//! A download becomes visible in two steps. [`stage_copy`] copies the
//! transferred bytes into a `.partial` file inside the downloads directory.
//! [`commit`] then removes any stale file at the canonical path and renames
//! the staged copy over it. A crash before the rename leaves only `.partial`
//! files behind, which [`sweep_partial_files`] removes on the next start.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::error::DownloadError;

use super::filename::is_partial_filename;

/// Copy a finished transfer into `downloads_dir` under `partial_name`.
///
/// On failure nothing is left behind in `downloads_dir`.
pub async fn stage_copy(
    transferred: &Path,
    downloads_dir: &Path,
    partial_name: &str,
) -> Result<PathBuf, DownloadError> {
    let staged = downloads_dir.join(partial_name);
    let finalize_failed = |source: std::io::Error| DownloadError::FinalizeFailed {
        path: staged.clone(),
        source,
    };

    let copied: std::io::Result<()> = async {
        fs::copy(transferred, &staged).await?;
        fs::File::open(&staged).await?.sync_all().await
    }
    .await;

    if let Err(e) = copied {
        discard(&staged).await;
        return Err(finalize_failed(e));
    }

    Ok(staged)
}

/// Atomically move a staged copy to its canonical path.
///
/// On failure the staged copy is discarded and the canonical path is left
/// untouched or absent.
pub async fn commit(staged: &Path, canonical: &Path) -> Result<(), DownloadError> {
    let finalize_failed = |source: std::io::Error| DownloadError::FinalizeFailed {
        path: canonical.to_path_buf(),
        source,
    };

    let result: std::io::Result<()> = async {
        remove_if_exists(canonical).await?;
        fs::rename(staged, canonical).await
    }
    .await;

    if let Err(e) = result {
        discard(staged).await;
        return Err(finalize_failed(e));
    }

    debug!(path = %canonical.display(), "Committed download");
    Ok(())
}

/// Remove a file, treating an already missing file as success
pub async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Best-effort removal of a temporary artifact
pub async fn discard(path: &Path) {
    if let Err(e) = remove_if_exists(path).await {
        debug!(path = %path.display(), error = %e, "Could not discard temporary file");
    }
}

/// Remove `.partial` files left behind by interrupted downloads.
///
/// Returns the number of files removed. A missing directory counts as empty.
pub fn sweep_partial_files(dir: &Path) -> std::io::Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut cleaned = 0;
    for entry in entries {
        let path = entry?.path();
        let is_partial = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_partial_filename);

        if is_partial && path.is_file() && std::fs::remove_file(&path).is_ok() {
            cleaned += 1;
        }
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn stage_then_commit_moves_bytes_into_place() {
        let dir = tempdir().unwrap();
        let transferred = dir.path().join("transfer.bin");
        std::fs::write(&transferred, b"audio").unwrap();

        let staged = stage_copy(&transferred, dir.path(), "ep.1.partial")
            .await
            .unwrap();
        let canonical = dir.path().join("ep.mp3");
        assert!(staged.exists());
        assert!(!canonical.exists());

        commit(&staged, &canonical).await.unwrap();

        assert_eq!(std::fs::read(&canonical).unwrap(), b"audio");
        assert!(!staged.exists());
    }

    #[tokio::test]
    async fn commit_replaces_stale_file() {
        let dir = tempdir().unwrap();
        let canonical = dir.path().join("ep.mp3");
        std::fs::write(&canonical, b"old and stale").unwrap();

        let staged = dir.path().join("ep.2.partial");
        std::fs::write(&staged, b"fresh").unwrap();

        commit(&staged, &canonical).await.unwrap();
        assert_eq!(std::fs::read(&canonical).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn failed_copy_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("never-written.bin");

        let result = stage_copy(&missing, dir.path(), "ep.1.partial").await;

        assert!(matches!(result, Err(DownloadError::FinalizeFailed { .. })));
        assert!(!dir.path().join("ep.1.partial").exists());
    }

    #[tokio::test]
    async fn interruption_before_rename_leaves_canonical_path_empty() {
        let dir = tempdir().unwrap();
        let transferred = dir.path().join("transfer.bin");
        std::fs::write(&transferred, b"audio").unwrap();

        // Staged but never committed, as if the process died here
        stage_copy(&transferred, dir.path(), "ep.1.partial")
            .await
            .unwrap();

        assert!(!dir.path().join("ep.mp3").exists());
        assert_eq!(sweep_partial_files(dir.path()).unwrap(), 1);
        assert!(!dir.path().join("ep.1.partial").exists());
        assert!(!dir.path().join("ep.mp3").exists());
    }

    #[test]
    fn sweep_only_removes_partial_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.1.partial"), b"x").unwrap();
        std::fs::write(dir.path().join("b.7.partial"), b"x").unwrap();
        std::fs::write(dir.path().join("c.mp3"), b"complete audio").unwrap();

        assert_eq!(sweep_partial_files(dir.path()).unwrap(), 2);
        assert!(dir.path().join("c.mp3").exists());
    }

    #[test]
    fn sweep_of_missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        assert_eq!(sweep_partial_files(&dir.path().join("nope")).unwrap(), 0);
    }

    #[tokio::test]
    async fn remove_if_exists_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.mp3");
        remove_if_exists(&path).await.unwrap();
        std::fs::write(&path, b"x").unwrap();
        remove_if_exists(&path).await.unwrap();
        assert!(!path.exists());
    }
}
