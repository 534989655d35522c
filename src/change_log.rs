// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change Log Writer (origin side).
//!
//! Turns a poll cycle's worth of accepted [`ChangeEvent`]s into one
//! `incremental` queue entry named after the current wall-clock second.
//! Writes are append-mode and synced to disk before [`record`] returns, so
//! the watcher is only told to continue once the batch is durable.
//!
//! [`record`]: ChangeLogWriter::record

use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::queue::{ChangeEvent, EntryKind, QueueDir, QueueEntry};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Appends batches of events to the queue directory.
#[derive(Debug, Clone)]
pub struct ChangeLogWriter {
    queue: QueueDir,
}

impl ChangeLogWriter {
    pub fn new(queue: QueueDir) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &QueueDir {
        &self.queue
    }

    /// Record events under the current second.
    pub async fn record(&self, events: &[ChangeEvent]) -> Result<Option<QueueEntry>> {
        self.record_at(events, current_version()).await
    }

    /// Record events under an explicit version.
    ///
    /// Returns `None` and touches nothing when `events` is empty.
    pub async fn record_at(&self, events: &[ChangeEvent], version: u64) -> Result<Option<QueueEntry>> {
        if events.is_empty() {
            return Ok(None);
        }
        let path = self.queue.entry_path(version, EntryKind::Incremental);
        let lines = events.iter().map(|e| e.to_line().render());
        append_lines(&path, lines).await?;

        info!(entry = %path.display(), events = events.len(), "Wrote changes");
        metrics::record_events_recorded(events.len());

        Ok(QueueEntry::from_path(path))
    }

    /// Write a `catchup` entry (used by the out-of-sync scanner).
    pub async fn record_catchup(&self, files: &[PathBuf], version: u64) -> Result<Option<QueueEntry>> {
        if files.is_empty() {
            return Ok(None);
        }
        let path = self.queue.entry_path(version, EntryKind::Catchup);
        let lines = files.iter().map(|f| f.to_string_lossy().into_owned());
        append_lines(&path, lines).await?;

        info!(entry = %path.display(), files = files.len(), "Wrote catch-up entry");
        Ok(QueueEntry::from_path(path))
    }
}

/// Origin wall-clock seconds, the version of entries written now.
pub fn current_version() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

async fn append_lines(path: &Path, lines: impl Iterator<Item = String>) -> Result<()> {
    let mut body = String::new();
    for line in lines {
        body.push_str(&line);
        body.push('\n');
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| ReplicationError::io("open queue entry", path, e))?;
    file.write_all(body.as_bytes())
        .await
        .map_err(|e| ReplicationError::io("append queue entry", path, e))?;
    file.flush()
        .await
        .map_err(|e| ReplicationError::io("flush queue entry", path, e))?;
    file.sync_data()
        .await
        .map_err(|e| ReplicationError::io("sync queue entry", path, e))?;

    debug!(entry = %path.display(), bytes = body.len(), "Queue entry durable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueLine;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_record_writes_one_entry_per_batch() {
        let dir = tempdir().unwrap();
        let writer = ChangeLogWriter::new(QueueDir::new(dir.path()));

        let events = vec![
            ChangeEvent::upsert("/srv/www/a.html"),
            ChangeEvent::delete("/srv/www/old.html"),
        ];
        let entry = writer.record_at(&events, 1_700_000_000).await.unwrap().unwrap();

        assert_eq!(entry.name, "1700000000.incremental");
        let body = std::fs::read_to_string(&entry.path).unwrap();
        assert_eq!(body, "/srv/www/a.html\n#DELETE:/srv/www/old.html\n");
    }

    #[tokio::test]
    async fn test_same_second_appends() {
        let dir = tempdir().unwrap();
        let writer = ChangeLogWriter::new(QueueDir::new(dir.path()));

        writer.record_at(&[ChangeEvent::upsert("/a")], 42).await.unwrap();
        let entry = writer
            .record_at(&[ChangeEvent::upsert("/b")], 42)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            entry.read_lines().await.unwrap(),
            vec![
                QueueLine::Upsert(PathBuf::from("/a")),
                QueueLine::Upsert(PathBuf::from("/b")),
            ]
        );
        assert_eq!(writer.queue().list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_writes_nothing() {
        let dir = tempdir().unwrap();
        let writer = ChangeLogWriter::new(QueueDir::new(dir.path()));
        assert!(writer.record_at(&[], 42).await.unwrap().is_none());
        assert!(writer.queue().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_catchup_kind() {
        let dir = tempdir().unwrap();
        let writer = ChangeLogWriter::new(QueueDir::new(dir.path()));
        let entry = writer
            .record_catchup(&[PathBuf::from("/srv/a"), PathBuf::from("/srv/b")], 77)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.kind, EntryKind::Catchup);
        assert_eq!(entry.name, "77.catchup");
        assert_eq!(entry.read_lines().await.unwrap().len(), 2);
    }

    #[test]
    fn test_current_version_is_recent() {
        let v = current_version();
        assert!(v > 1_600_000_000);
    }
}
