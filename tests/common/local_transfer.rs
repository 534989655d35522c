//! Filesystem-backed transfer for testing.
//!
//! Copies from the local filesystem the way the daemon-protocol tool copies
//! from the origin's `root` module: the transfer root maps to the same path
//! locally, `--files-from` lists are read relative to it, and every copied
//! file is reported as a `file:` line. A listed source that does not exist
//! yields exit status 23 after the remaining files are copied.
//!
//! Exit statuses can be scripted per call to simulate failures, and every
//! request is recorded for assertions.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tree_replication_engine::filter::shell_glob;
use tree_replication_engine::transfer::{
    BoxFuture, Transfer, TransferOutput, TransferRequest, TransferSource,
};
use walkdir::WalkDir;

/// Exit status for "some listed sources vanished".
pub const VANISHED: i32 = 23;

pub struct LocalTransfer {
    /// The origin's queue dir, mirrored on `Updates`. `None` when origin and
    /// follower share it.
    origin_queue: Option<PathBuf>,
    /// Scripted tree transfers, consumed front to back. `None` copies for real.
    scripted: Mutex<VecDeque<Option<TransferOutput>>>,
    requests: Mutex<Vec<TransferRequest>>,
}

impl LocalTransfer {
    pub fn new() -> Self {
        Self {
            origin_queue: None,
            scripted: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Mirror `queue` on every `Updates` request.
    pub fn with_origin_queue(mut self, queue: impl Into<PathBuf>) -> Self {
        self.origin_queue = Some(queue.into());
        self
    }

    /// Make the next tree transfer exit with `status` without copying anything.
    pub fn fail_next(&self, status: i32) {
        self.scripted
            .lock()
            .unwrap()
            .push_back(Some(TransferOutput::failed(status, "scripted failure")));
    }

    /// Make the next tree transfer exit with `status` after reporting `files`
    /// as copied (a transfer that dies partway through).
    pub fn fail_next_after(&self, status: i32, files: &[&str]) {
        let stdout: String = files.iter().map(|f| format!("file:{}\n", f)).collect();
        self.scripted.lock().unwrap().push_back(Some(TransferOutput {
            exit_status: status,
            stdout,
            stderr: "scripted failure".to_string(),
        }));
    }

    /// Let the next tree transfer copy for real (to script a later one).
    pub fn pass_next(&self) {
        self.scripted.lock().unwrap().push_back(None);
    }

    /// All recorded requests.
    pub fn requests(&self) -> Vec<TransferRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Recorded tree transfers (queue fetches filtered out).
    pub fn tree_requests(&self) -> Vec<TransferRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.source != TransferSource::Updates)
            .collect()
    }

    fn mirror_queue(&self, destination: &Path) -> TransferOutput {
        let Some(origin_queue) = &self.origin_queue else {
            return TransferOutput::clean("");
        };
        if let Err(e) = std::fs::create_dir_all(destination) {
            return TransferOutput::failed(11, e.to_string());
        }
        let mut stdout = String::new();
        let entries = match std::fs::read_dir(origin_queue) {
            Ok(entries) => entries,
            Err(e) => return TransferOutput::failed(10, e.to_string()),
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            if let Err(e) = std::fs::copy(entry.path(), destination.join(&name)) {
                return TransferOutput::failed(11, e.to_string());
            }
            stdout.push_str(&format!("file:{}\n", name.to_string_lossy()));
        }
        TransferOutput::clean(stdout)
    }

    fn copy_tree(&self, root: &Path, request: &TransferRequest) -> TransferOutput {
        let excludes = Excludes::new(&request.excludes);
        let relatives: Vec<(PathBuf, bool)> = match &request.files_from {
            Some(list) => match std::fs::read_to_string(list) {
                Ok(raw) => raw
                    .lines()
                    .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
                    .map(|l| (PathBuf::from(l.trim_start_matches('/')), true))
                    .collect(),
                Err(e) => return TransferOutput::failed(3, e.to_string()),
            },
            None => WalkDir::new(root)
                .min_depth(1)
                .into_iter()
                .flatten()
                .filter(|e| !e.file_type().is_dir())
                .filter_map(|e| e.path().strip_prefix(root).ok().map(Path::to_path_buf))
                .map(|rel| (rel, false))
                .collect(),
        };

        let mut stdout = String::new();
        let mut vanished = false;
        for (rel, listed) in relatives {
            if excludes.matches(&rel) {
                continue;
            }
            let source = root.join(&rel);
            if !source.exists() {
                vanished |= listed;
                continue;
            }
            if source.is_dir() {
                continue;
            }
            let target = request.destination.join(&rel);
            let copied = target
                .parent()
                .map(std::fs::create_dir_all)
                .unwrap_or(Ok(()))
                .and_then(|_| std::fs::copy(&source, &target));
            if let Err(e) = copied {
                return TransferOutput::failed(11, format!("{}: {}", target.display(), e));
            }
            stdout.push_str(&format!("file:{}\n", rel.display()));
        }

        TransferOutput {
            exit_status: if vanished { VANISHED } else { 0 },
            stdout,
            stderr: String::new(),
        }
    }
}

impl Default for LocalTransfer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transfer for LocalTransfer {
    fn run(&self, request: TransferRequest) -> BoxFuture<'_, TransferOutput> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request.clone());
            match &request.source {
                TransferSource::Updates => Ok(self.mirror_queue(&request.destination)),
                TransferSource::Tree(root) => {
                    let scripted = self.scripted.lock().unwrap().pop_front().flatten();
                    if let Some(output) = scripted {
                        return Ok(output);
                    }
                    Ok(self.copy_tree(root, &request))
                }
            }
        })
    }
}

/// Minimal exclude matching over paths relative to the transfer root.
struct Excludes {
    dirs: Vec<PathBuf>,
    globs: Vec<globset::GlobMatcher>,
}

impl Excludes {
    fn new(patterns: &[String]) -> Self {
        let mut dirs = Vec::new();
        let mut globs = Vec::new();
        for pattern in patterns {
            if let Some(dir) = pattern.strip_prefix('/').and_then(|p| p.strip_suffix('/')) {
                dirs.push(PathBuf::from(dir));
            } else if let Ok(glob) = shell_glob(pattern.trim_start_matches('/')) {
                globs.push(glob.compile_matcher());
            }
        }
        Self { dirs, globs }
    }

    fn matches(&self, rel: &Path) -> bool {
        self.dirs.iter().any(|d| rel.starts_with(d)) || self.globs.iter().any(|g| g.is_match(rel))
    }
}
