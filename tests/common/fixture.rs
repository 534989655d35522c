//! Per-test fixture: one tempdir holding the origin tree, the working dirs
//! and the replica.
//!
//! ```text
//! <tmp>/tree/      watched root (origin side)
//! <tmp>/var/       state dir (cursor, checkpoint)
//! <tmp>/data/      queue dir
//! <tmp>/replica/   replica root; origin path /x/y lands at replica/x/y
//! ```

use super::LocalTransfer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tree_replication_engine::{FollowerEngine, ReplicationConfig};

pub struct Fixture {
    pub dir: TempDir,
    pub config: ReplicationConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = ReplicationConfig::for_testing(dir.path());
        config.paths.create_dirs().unwrap();
        std::fs::create_dir_all(dir.path().join("tree")).unwrap();
        std::fs::create_dir_all(dir.path().join("replica")).unwrap();
        Self { dir, config }
    }

    pub fn base(&self) -> &Path {
        self.dir.path()
    }

    pub fn tree(&self) -> PathBuf {
        self.base().join("tree")
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.base().join("data")
    }

    pub fn cursor_file(&self) -> PathBuf {
        self.config.paths.cursor_file()
    }

    /// Write a file under the origin tree, returning its origin path.
    pub fn origin_file(&self, rel: &str, body: &str) -> PathBuf {
        let path = self.tree().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        path
    }

    /// Where an origin path lives in the replica.
    pub fn replica_of(&self, origin_path: &Path) -> PathBuf {
        self.base()
            .join("replica")
            .join(origin_path.strip_prefix("/").unwrap())
    }

    /// Write a queue entry `<version>.<kind>` with the given lines.
    pub fn write_entry(&self, name: &str, lines: &[String]) {
        let mut body = lines.join("\n");
        body.push('\n');
        std::fs::write(self.queue_dir().join(name), body).unwrap();
    }

    pub fn set_cursor(&self, version: u64) {
        std::fs::write(self.cursor_file(), version.to_string()).unwrap();
    }

    pub fn cursor(&self) -> u64 {
        std::fs::read_to_string(self.cursor_file())
            .unwrap()
            .trim()
            .parse()
            .unwrap()
    }

    pub fn engine(&self, transfer: Arc<LocalTransfer>) -> FollowerEngine<LocalTransfer> {
        FollowerEngine::with_transfer(&self.config, transfer).unwrap()
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a delete line.
pub fn delete_line(path: &Path) -> String {
    format!("#DELETE:{}", path.display())
}

/// Render an upsert line.
pub fn upsert_line(path: &Path) -> String {
    path.display().to_string()
}
