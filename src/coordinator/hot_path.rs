//! Hot path: the queue reconciler.
//!
//! One reconcile cycle:
//! 1. Mirrors the origin's queue into the local queue dir (failure is logged,
//!    the cycle continues against the local mirror)
//! 2. Loads the cursor and computes the pending set (`version >= cursor`,
//!    sorted by numeric version, then name)
//! 3. Transfers each entry with `--files-from=<entry>` and classifies the exit
//!    status: clean, partial-vanished (apply the entry's deletes, re-run once)
//!    or failed
//! 4. Hands every synced or deleted path to the action trigger
//! 5. Advances the cursor to the highest version seen, unless any entry
//!    failed
//!
//! # Forward Progress
//!
//! Entries sharing the cursor's second are re-read every cycle. When the
//! only pending entry is the one at the cursor itself, the cursor is bumped
//! by one so the same entry is not reprocessed forever.
//!
//! # Failure Semantics
//!
//! A failed entry does not stop the pass: later entries are still
//! transferred so they are not starved. The cursor, however, stays at its
//! pre-cycle value and the next cycle retries the identical pending set.
//! Re-applying an entry is idempotent.

use super::types::{CycleOutcome, CycleReport, EntryResult};
use super::FollowerContext;
use crate::cursor::{write_end_marker, CursorStore};
use crate::error::Result;
use crate::metrics;
use crate::queue::{QueueDir, QueueEntry};
use crate::transfer::{Transfer, TransferOutcome, TransferRequest, TransferSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Drives reconcile cycles against the local queue mirror.
pub struct QueueReconciler<T: Transfer> {
    ctx: Arc<FollowerContext<T>>,
    queue: QueueDir,
    cursor: CursorStore,
    end_marker: Option<PathBuf>,
}

/// Accumulators for one cycle.
#[derive(Default)]
struct CycleState {
    synced: Vec<PathBuf>,
    deleted: Vec<PathBuf>,
    failed: bool,
}

impl<T: Transfer> QueueReconciler<T> {
    pub fn new(
        ctx: Arc<FollowerContext<T>>,
        queue: QueueDir,
        cursor: CursorStore,
        end_marker: Option<PathBuf>,
    ) -> Self {
        Self {
            ctx,
            queue,
            cursor,
            end_marker,
        }
    }

    pub fn cursor_store(&self) -> &CursorStore {
        &self.cursor
    }

    pub fn queue(&self) -> &QueueDir {
        &self.queue
    }

    /// Run one reconcile cycle.
    ///
    /// `Err` means the cycle could not run at all (cursor unreadable, queue
    /// unlistable, cursor not persistable). Transfer failures are not errors:
    /// they yield [`CycleOutcome::Retry`].
    pub async fn reconcile_cycle(&self) -> Result<CycleReport> {
        let span = info_span!("hot_path");
        async move {
            let started = Instant::now();
            let report = self.cycle().await;
            if let Ok(report) = &report {
                metrics::record_cycle(report.outcome.as_str(), started.elapsed());
            }
            report
        }
        .instrument(span)
        .await
    }

    async fn cycle(&self) -> Result<CycleReport> {
        self.fetch_queue().await;

        let cursor_before = self.cursor.load().await?;
        metrics::set_cursor_version(cursor_before);

        let pending = self.queue.pending(cursor_before).await?;
        metrics::set_pending_entries(pending.len());

        if pending.is_empty() {
            debug!(cursor = cursor_before, "Nothing pending");
            if !self.ctx.dry_run {
                self.write_marker(cursor_before).await;
            }
            return Ok(CycleReport::idle(cursor_before));
        }

        info!(cursor = cursor_before, pending = pending.len(), "Reconciling queue");

        // entries are origin-absolute paths, transferred from the origin root
        let excludes = self.ctx.excludes.transfer_patterns(Path::new("/"));
        let mut state = CycleState::default();
        let mut entries = Vec::with_capacity(pending.len());
        let mut max_version = cursor_before;

        for entry in &pending {
            max_version = max_version.max(entry.version);
            let outcome = self.apply_entry(entry, &excludes, &mut state).await;
            entries.push(EntryResult {
                name: entry.name.clone(),
                version: entry.version,
                outcome,
            });
        }

        state.synced.sort();
        state.synced.dedup();

        let actions = if state.synced.is_empty() {
            Vec::new()
        } else {
            self.ctx.actions.trigger(&state.synced)
        };

        let (outcome, cursor_after) = if state.failed {
            warn!(cursor = cursor_before, "Cycle had failed transfers, not advancing cursor");
            (CycleOutcome::Retry, cursor_before)
        } else {
            let candidate = next_cursor(cursor_before, max_version, pending.len());
            if self.ctx.dry_run {
                info!(from = cursor_before, to = candidate, "Dry run, not persisting cursor");
                (CycleOutcome::DryRun, candidate)
            } else if candidate != cursor_before {
                if let Err(e) = self.cursor.store(candidate).await {
                    metrics::record_cursor_persist(false);
                    return Err(e);
                }
                metrics::record_cursor_persist(true);
                metrics::set_cursor_version(candidate);
                info!(from = cursor_before, to = candidate, "Advancing cursor");
                (CycleOutcome::Advanced, candidate)
            } else {
                (CycleOutcome::Unchanged, candidate)
            }
        };

        if matches!(outcome, CycleOutcome::Advanced | CycleOutcome::Unchanged) {
            self.write_marker(cursor_after).await;
        }

        Ok(CycleReport {
            outcome,
            cursor_before,
            cursor_after,
            entries,
            synced_paths: state.synced,
            deleted_paths: state.deleted,
            actions,
        })
    }

    /// Mirror the origin's queue into the local queue dir.
    async fn fetch_queue(&self) {
        let request = TransferRequest {
            source: TransferSource::Updates,
            destination: self.queue.root().to_path_buf(),
            excludes: Vec::new(),
            files_from: None,
        };
        let (outcome, output) = self.ctx.run_transfer(request, "queue_fetch").await;
        if outcome != TransferOutcome::Clean {
            warn!(
                status = output.exit_status,
                stderr = %output.stderr.trim(),
                "Queue fetch failed, using local mirror"
            );
        }
    }

    async fn apply_entry(
        &self,
        entry: &QueueEntry,
        excludes: &[String],
        state: &mut CycleState,
    ) -> TransferOutcome {
        let root = Path::new("/");
        let request = TransferRequest {
            source: TransferSource::Tree(root.to_path_buf()),
            destination: self.ctx.replica_root.clone(),
            excludes: excludes.to_vec(),
            files_from: Some(entry.path.clone()),
        };

        let (outcome, output) = self.ctx.run_transfer(request.clone(), "entry").await;
        match outcome {
            TransferOutcome::Clean => {
                let synced = self.ctx.synced_paths(root, &output);
                debug!(entry = %entry.name, files = synced.len(), "Entry synced");
                state.synced.extend(synced);
                outcome
            }
            TransferOutcome::PartialVanished => {
                info!(entry = %entry.name, status = output.exit_status, "Sources vanished, applying deletes");
                state.synced.extend(self.ctx.synced_paths(root, &output));

                for (origin_path, local_path) in self.apply_deletions(entry).await {
                    state.synced.push(origin_path);
                    state.deleted.push(local_path);
                }

                let (retry, output) = self.ctx.run_transfer(request, "entry").await;
                match retry {
                    TransferOutcome::Failed(status) => {
                        warn!(
                            entry = %entry.name,
                            status,
                            stdout = %output.stdout.trim(),
                            stderr = %output.stderr.trim(),
                            "Re-transfer after deletes failed"
                        );
                        state.synced.extend(self.ctx.synced_paths(root, &output));
                        state.failed = true;
                        retry
                    }
                    _ => {
                        state.synced.extend(self.ctx.synced_paths(root, &output));
                        outcome
                    }
                }
            }
            TransferOutcome::Failed(status) => {
                warn!(
                    entry = %entry.name,
                    status,
                    stdout = %output.stdout.trim(),
                    stderr = %output.stderr.trim(),
                    "Transfer failed"
                );
                // files copied before the failure are not reported again on retry
                state.synced.extend(self.ctx.synced_paths(root, &output));
                state.failed = true;
                outcome
            }
        }
    }

    /// Remove the entry's delete lines from the replica.
    ///
    /// Returns `(origin path, local path)` for every path that is gone
    /// afterwards. Errors are logged and swallowed.
    async fn apply_deletions(&self, entry: &QueueEntry) -> Vec<(PathBuf, PathBuf)> {
        let deletions = match entry.deletions().await {
            Ok(deletions) => deletions,
            Err(e) => {
                warn!(entry = %entry.name, error = %e, "Cannot read delete lines");
                return Vec::new();
            }
        };

        let mut removed = Vec::new();
        for origin_path in deletions {
            if !self.ctx.is_deletable(&origin_path) {
                warn!(path = %origin_path.display(), "Refusing to delete outside watched roots");
                metrics::record_delete_skipped("outside_roots");
                continue;
            }
            if self.ctx.excludes.is_excluded(&origin_path) {
                debug!(path = %origin_path.display(), "Delete target is excluded, skipping");
                metrics::record_delete_skipped("excluded");
                continue;
            }

            let local_path = self.ctx.replica_path(&origin_path);
            if self.ctx.dry_run {
                info!(path = %local_path.display(), "Dry run, not deleting");
                removed.push((origin_path, local_path));
                continue;
            }

            match remove_local(&local_path).await {
                Ok(true) => {
                    info!(path = %local_path.display(), "Deleted");
                    removed.push((origin_path, local_path));
                }
                Ok(false) => {
                    debug!(path = %local_path.display(), "Already absent");
                    removed.push((origin_path, local_path));
                }
                Err(e) => {
                    warn!(path = %local_path.display(), error = %e, "Delete failed");
                    metrics::record_delete_skipped("error");
                }
            }
        }

        if !self.ctx.dry_run {
            metrics::record_local_deletes(removed.len());
        }
        removed
    }

    async fn write_marker(&self, version: u64) {
        if let Some(path) = &self.end_marker {
            if let Err(e) = write_end_marker(path, version).await {
                warn!(path = %path.display(), error = %e, "Failed to write end marker");
            }
        }
    }
}

/// The cursor a successful cycle commits.
///
/// `max_version` is the highest version seen, never below `cursor`.
pub fn next_cursor(cursor: u64, max_version: u64, processed: usize) -> u64 {
    let candidate = max_version.max(cursor);
    if processed == 1 && candidate == cursor {
        candidate.saturating_add(1)
    } else {
        candidate
    }
}

/// Remove a file, symlink or directory tree. `Ok(false)` if already absent.
async fn remove_local(path: &Path) -> std::io::Result<bool> {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if meta.file_type().is_dir() {
        tokio::fs::remove_dir_all(path).await?;
    } else {
        tokio::fs::remove_file(path).await?;
    }
    Ok(true)
}
