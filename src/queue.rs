// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The change queue: versioned, append-only entries on disk.
//!
//! Each entry is a plain text file named `<version>.<kind>` where `version`
//! is origin wall-clock seconds and `kind` is `incremental` (live events) or
//! `catchup` (startup scan). Every line is an absolute path; delete lines
//! carry the [`DELETE_SENTINEL`] prefix. The sentinel starts with `#`, so a
//! transfer tool reading the entry as a `--files-from` list treats delete
//! lines as comments.
//!
//! ```text
//! data/
//! ├── 1718000000.catchup       /srv/www/a.html
//! ├── 1718000042.incremental   /srv/www/b.html
//! │                            #DELETE:/srv/www/old.html
//! └── 1718000042.incremental.part   (ignored: not <version>.<kind>)
//! ```
//!
//! Entries are never mutated after their second has passed and are never
//! deleted by a follower.

use crate::error::{ReplicationError, Result};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Prefix marking a delete line.
pub const DELETE_SENTINEL: &str = "#DELETE:";

/// A filesystem change, as observed by the watcher or the catch-up scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub is_delete: bool,
}

impl ChangeEvent {
    pub fn upsert(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            is_delete: false,
        }
    }

    pub fn delete(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            is_delete: true,
        }
    }

    /// The queue line this event is recorded as.
    pub fn to_line(&self) -> QueueLine {
        if self.is_delete {
            QueueLine::Delete(self.path.clone())
        } else {
            QueueLine::Upsert(self.path.clone())
        }
    }
}

/// Kind tag of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryKind {
    /// Batched live events.
    Incremental,
    /// Synthesized by the startup out-of-sync scan.
    Catchup,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Incremental => "incremental",
            EntryKind::Catchup => "catchup",
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "incremental" | "inotify" => Ok(EntryKind::Incremental),
            "catchup" | "sync" => Ok(EntryKind::Catchup),
            other => Err(ReplicationError::QueueEntry(format!(
                "unknown entry kind '{}'",
                other
            ))),
        }
    }
}

/// One line of a queue entry body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueLine {
    Upsert(PathBuf),
    Delete(PathBuf),
}

impl QueueLine {
    /// Parse a body line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return None;
        }
        match line.strip_prefix(DELETE_SENTINEL) {
            Some(path) if !path.is_empty() => Some(QueueLine::Delete(PathBuf::from(path))),
            Some(_) => None,
            None => Some(QueueLine::Upsert(PathBuf::from(line))),
        }
    }

    /// Render as a body line (without trailing newline).
    pub fn render(&self) -> String {
        match self {
            QueueLine::Upsert(path) => path.to_string_lossy().into_owned(),
            QueueLine::Delete(path) => format!("{}{}", DELETE_SENTINEL, path.to_string_lossy()),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            QueueLine::Upsert(p) | QueueLine::Delete(p) => p,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, QueueLine::Delete(_))
    }
}

/// A persisted queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub version: u64,
    pub kind: EntryKind,
    /// File name as found on disk (legacy kind names preserved).
    pub name: String,
    pub path: PathBuf,
}

impl QueueEntry {
    /// Canonical file name for a version and kind.
    pub fn file_name(version: u64, kind: EntryKind) -> String {
        format!("{}.{}", version, kind)
    }

    /// Parse `<version>.<kind>`. Anything else yields `None`.
    pub fn parse_name(name: &str) -> Option<(u64, EntryKind)> {
        let (version, kind) = name.split_once('.')?;
        if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let version = version.parse::<u64>().ok()?;
        let kind = kind.parse::<EntryKind>().ok()?;
        Some((version, kind))
    }

    /// Build an entry from a path whose file name parses.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let name = path.file_name()?.to_str()?.to_string();
        let (version, kind) = Self::parse_name(&name)?;
        Some(Self {
            version,
            kind,
            name,
            path,
        })
    }

    /// Read and parse the entry body.
    pub async fn read_lines(&self) -> Result<Vec<QueueLine>> {
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ReplicationError::io("read queue entry", &self.path, e))?;
        Ok(body.lines().filter_map(QueueLine::parse).collect())
    }

    /// Delete lines of the body, in order.
    pub async fn deletions(&self) -> Result<Vec<PathBuf>> {
        Ok(self
            .read_lines()
            .await?
            .into_iter()
            .filter_map(|line| match line {
                QueueLine::Delete(p) => Some(p),
                QueueLine::Upsert(_) => None,
            })
            .collect())
    }
}

/// Deterministic pending order: numeric version, then name.
pub fn compare_entries(a: &QueueEntry, b: &QueueEntry) -> Ordering {
    a.version
        .cmp(&b.version)
        .then_with(|| a.name.cmp(&b.name))
}

/// A queue directory.
#[derive(Debug, Clone)]
pub struct QueueDir {
    root: PathBuf,
}

impl QueueDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the entry for `version` and `kind`.
    pub fn entry_path(&self, version: u64, kind: EntryKind) -> PathBuf {
        self.root.join(QueueEntry::file_name(version, kind))
    }

    /// Every well-formed entry, sorted.
    pub async fn list(&self) -> Result<Vec<QueueEntry>> {
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(ReplicationError::io("list queue", &self.root, e)),
        };

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| ReplicationError::io("list queue", &self.root, e))?
        {
            match QueueEntry::from_path(item.path()) {
                Some(entry) => entries.push(entry),
                None => debug!(name = ?item.file_name(), "Ignoring non-queue file"),
            }
        }

        entries.sort_by(compare_entries);
        Ok(entries)
    }

    /// The PendingSet: entries with `version >= cursor`, in processing order.
    pub async fn pending(&self, cursor: u64) -> Result<Vec<QueueEntry>> {
        let entries = self.list().await?;
        Ok(select_pending(entries, cursor))
    }
}

/// Keep entries at or above `cursor`, in processing order.
pub fn select_pending(mut entries: Vec<QueueEntry>, cursor: u64) -> Vec<QueueEntry> {
    entries.retain(|e| {
        let pending = e.version >= cursor;
        if !pending {
            debug!(name = %e.name, "Already processed");
        }
        pending
    });
    entries.sort_by(compare_entries);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_name() {
        assert_eq!(
            QueueEntry::parse_name("1718000000.incremental"),
            Some((1_718_000_000, EntryKind::Incremental))
        );
        assert_eq!(
            QueueEntry::parse_name("1718000000.catchup"),
            Some((1_718_000_000, EntryKind::Catchup))
        );
    }

    #[test]
    fn test_parse_legacy_kind_names() {
        assert_eq!(
            QueueEntry::parse_name("100.inotify"),
            Some((100, EntryKind::Incremental))
        );
        assert_eq!(QueueEntry::parse_name("100.sync"), Some((100, EntryKind::Catchup)));
    }

    #[test]
    fn test_parse_name_rejects_garbage() {
        for name in [
            "",
            "incremental",
            ".incremental",
            "abc.incremental",
            "-5.incremental",
            "100.unknown",
            "100.incremental.part",
            "100",
            "+100.catchup",
        ] {
            assert_eq!(QueueEntry::parse_name(name), None, "{}", name);
        }
    }

    #[test]
    fn test_queue_line_parse() {
        assert_eq!(
            QueueLine::parse("/a/b.txt"),
            Some(QueueLine::Upsert(PathBuf::from("/a/b.txt")))
        );
        assert_eq!(
            QueueLine::parse("#DELETE:/a/b.txt"),
            Some(QueueLine::Delete(PathBuf::from("/a/b.txt")))
        );
        assert_eq!(QueueLine::parse(""), None);
        assert_eq!(QueueLine::parse("   "), None);
        assert_eq!(QueueLine::parse("#DELETE:"), None);
    }

    #[test]
    fn test_queue_line_render() {
        assert_eq!(QueueLine::Delete(PathBuf::from("/x")).render(), "#DELETE:/x");
        assert_eq!(QueueLine::Upsert(PathBuf::from("/x")).render(), "/x");
        assert_eq!(ChangeEvent::delete("/x").to_line(), QueueLine::Delete(PathBuf::from("/x")));
    }

    #[test]
    fn test_pending_order_ties_broken_by_name() {
        let entries = vec![
            QueueEntry::from_path("/q/101.incremental").unwrap(),
            QueueEntry::from_path("/q/100.incremental").unwrap(),
            QueueEntry::from_path("/q/100.catchup").unwrap(),
            QueueEntry::from_path("/q/99.incremental").unwrap(),
        ];
        let pending = select_pending(entries, 100);
        let names: Vec<_> = pending.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["100.catchup", "100.incremental", "101.incremental"]);
    }

    #[test]
    fn test_numeric_not_lexical_order() {
        let entries = vec![
            QueueEntry::from_path("/q/1000.incremental").unwrap(),
            QueueEntry::from_path("/q/999.incremental").unwrap(),
        ];
        let pending = select_pending(entries, 1);
        assert_eq!(pending[0].version, 999);
        assert_eq!(pending[1].version, 1000);
    }

    #[tokio::test]
    async fn test_queue_dir_listing_skips_foreign_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("5.incremental"), "/a\n").unwrap();
        std::fs::write(dir.path().join("3.catchup"), "/b\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join(".rsync-tmp.12"), "x").unwrap();

        let queue = QueueDir::new(dir.path());
        let all = queue.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].version, 3);

        let pending = queue.pending(4).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].name, "5.incremental");
    }

    #[tokio::test]
    async fn test_missing_queue_dir_is_empty() {
        let dir = tempdir().unwrap();
        let queue = QueueDir::new(dir.path().join("absent"));
        assert!(queue.pending(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_entry_deletions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("7.incremental");
        std::fs::write(&path, "/a/keep.txt\n#DELETE:/a/gone.txt\n\n#DELETE:/a/dir\n").unwrap();

        let entry = QueueEntry::from_path(&path).unwrap();
        assert_eq!(entry.read_lines().await.unwrap().len(), 3);
        assert_eq!(
            entry.deletions().await.unwrap(),
            vec![PathBuf::from("/a/gone.txt"), PathBuf::from("/a/dir")]
        );
    }
}
