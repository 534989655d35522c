// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Out-of-Sync Scanner (origin side).
//!
//! Runs once at origin startup, before the steady-state loop. Every file under
//! a watched root whose change time is strictly newer than the last
//! checkpoint, and which is not excluded, goes into a single `catchup`
//! queue entry. Excluded directories are pruned, not descended.
//!
//! Without a checkpoint the scan is a no-op: a fresh origin assumes nothing
//! was missed, and followers rely on an initial full sync instead.

use crate::change_log::{current_version, ChangeLogWriter};
use crate::cursor::CheckpointStore;
use crate::error::{ReplicationError, Result};
use crate::filter::ExcludeSet;
use crate::metrics;
use crate::queue::QueueEntry;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Startup catch-up scan.
#[derive(Debug, Clone)]
pub struct OutOfSyncScanner {
    roots: Vec<PathBuf>,
    excludes: ExcludeSet,
    writer: ChangeLogWriter,
    checkpoint: CheckpointStore,
}

impl OutOfSyncScanner {
    pub fn new(
        roots: Vec<PathBuf>,
        excludes: ExcludeSet,
        writer: ChangeLogWriter,
        checkpoint: CheckpointStore,
    ) -> Self {
        Self {
            roots,
            excludes,
            writer,
            checkpoint,
        }
    }

    /// Scan against the stored checkpoint, stamping new entries with the current second.
    pub async fn scan(&self) -> Result<Option<QueueEntry>> {
        self.scan_at(current_version()).await
    }

    /// Scan and, if anything changed, write `<now>.catchup` and move the
    /// checkpoint to `now`.
    pub async fn scan_at(&self, now: u64) -> Result<Option<QueueEntry>> {
        let Some(since) = self.checkpoint.load().await? else {
            info!("No checkpoint yet, skipping catch-up scan");
            return Ok(None);
        };

        let roots = self.roots.clone();
        let excludes = self.excludes.clone();
        let files = tokio::task::spawn_blocking(move || changed_since(&roots, &excludes, since))
            .await
            .map_err(|e| ReplicationError::Internal(format!("catch-up scan panicked: {}", e)))?;

        metrics::record_catchup_files(files.len());
        if files.is_empty() {
            info!(since, "Nothing changed while stopped");
            return Ok(None);
        }

        info!(since, files = files.len(), "Found files changed while stopped");
        let entry = self.writer.record_catchup(&files, now).await?;
        let now = i64::try_from(now)
            .map_err(|_| ReplicationError::Internal(format!("timestamp {} out of range", now)))?;
        self.checkpoint.store(now).await?;
        Ok(entry)
    }
}

/// Non-directory paths under `roots` changed at or after `since`.
///
/// `since` has whole-second precision, so the checkpoint second itself is
/// included; re-listing a file is harmless.
///
/// Walk errors (permissions, races with deletes) are logged and skipped.
pub fn changed_since(roots: &[PathBuf], excludes: &ExcludeSet, since: i64) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for root in roots {
        if !root.exists() {
            warn!(root = %root.display(), "Watched root does not exist");
            continue;
        }

        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !excludes.is_excluded(entry.path()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Walk error during catch-up scan");
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }
            match entry.metadata() {
                Ok(meta) if change_time(&meta) >= since => files.push(entry.into_path()),
                Ok(_) => {}
                Err(e) => debug!(path = %entry.path().display(), error = %e, "Cannot stat"),
            }
        }
    }

    files.sort();
    files
}

#[cfg(unix)]
fn change_time(meta: &std::fs::Metadata) -> i64 {
    use std::os::unix::fs::MetadataExt;
    meta.ctime()
}

#[cfg(not(unix))]
fn change_time(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{EntryKind, QueueDir, QueueLine};
    use tempfile::tempdir;

    fn scanner(base: &std::path::Path, excludes: ExcludeSet) -> OutOfSyncScanner {
        OutOfSyncScanner::new(
            vec![base.join("tree")],
            excludes,
            ChangeLogWriter::new(QueueDir::new(base.join("data"))),
            CheckpointStore::new(base.join(".version")),
        )
    }

    #[tokio::test]
    async fn test_no_checkpoint_is_noop() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("tree")).unwrap();
        std::fs::write(dir.path().join("tree/a.txt"), "x").unwrap();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();

        let scanner = scanner(dir.path(), ExcludeSet::empty());
        assert!(scanner.scan().await.unwrap().is_none());
        assert!(!dir.path().join(".version").exists());
    }

    #[tokio::test]
    async fn test_changed_files_become_catchup_entry() {
        let dir = tempdir().unwrap();
        let tree = dir.path().join("tree");
        std::fs::create_dir_all(tree.join("sub")).unwrap();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(tree.join("a.txt"), "x").unwrap();
        std::fs::write(tree.join("sub/b.txt"), "y").unwrap();
        std::fs::write(tree.join("sub/c.tmp"), "z").unwrap();

        // checkpoint well before the files were written
        std::fs::write(dir.path().join(".version"), "1000").unwrap();

        let scanner = scanner(dir.path(), ExcludeSet::new(["*.tmp"]).unwrap());
        let entry = scanner.scan_at(1_900_000_000).await.unwrap().unwrap();

        assert_eq!(entry.kind, EntryKind::Catchup);
        assert_eq!(entry.version, 1_900_000_000);
        let lines = entry.read_lines().await.unwrap();
        assert_eq!(
            lines,
            vec![
                QueueLine::Upsert(tree.join("a.txt")),
                QueueLine::Upsert(tree.join("sub/b.txt")),
            ]
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join(".version")).unwrap(),
            "1900000000"
        );
    }

    #[tokio::test]
    async fn test_nothing_newer_writes_nothing() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("tree")).unwrap();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("tree/a.txt"), "x").unwrap();
        // checkpoint in the future
        std::fs::write(dir.path().join(".version"), "4000000000").unwrap();

        let scanner = scanner(dir.path(), ExcludeSet::empty());
        assert!(scanner.scan().await.unwrap().is_none());
        assert!(QueueDir::new(dir.path().join("data")).list().await.unwrap().is_empty());
        assert_eq!(
            std::fs::read_to_string(dir.path().join(".version")).unwrap(),
            "4000000000"
        );
    }

    #[tokio::test]
    async fn test_change_in_checkpoint_second_is_caught_up() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("tree")).unwrap();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        let file = dir.path().join("tree/late.txt");
        std::fs::write(&file, "x").unwrap();

        // checkpoint taken in the same second the file changed
        let ctime = change_time(&std::fs::metadata(&file).unwrap());
        std::fs::write(dir.path().join(".version"), ctime.to_string()).unwrap();

        let scanner = scanner(dir.path(), ExcludeSet::empty());
        let now = ctime as u64 + 10;
        let entry = scanner.scan_at(now).await.unwrap().unwrap();
        assert_eq!(entry.read_lines().await.unwrap(), vec![QueueLine::Upsert(file)]);
    }

    #[test]
    fn test_excluded_directories_are_pruned() {
        let dir = tempdir().unwrap();
        let tree = dir.path().join("tree");
        std::fs::create_dir_all(tree.join("cache/deep")).unwrap();
        std::fs::write(tree.join("cache/deep/x"), "x").unwrap();
        std::fs::write(tree.join("keep"), "x").unwrap();

        let excludes = ExcludeSet::new([format!("{}/cache", tree.display())]).unwrap();
        let files = changed_since(&[tree.clone()], &excludes, 0);
        assert_eq!(files, vec![tree.join("keep")]);
    }

    #[test]
    fn test_missing_root_is_skipped() {
        let dir = tempdir().unwrap();
        let files = changed_since(&[dir.path().join("absent")], &ExcludeSet::empty(), 0);
        assert!(files.is_empty());
    }
}
