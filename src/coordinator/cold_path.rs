// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cold path: full reconciliation.
//!
//! Transfers every watched root as a whole subtree, independent of the
//! queue. This corrects drift the queue cannot see (a follower that was
//! down longer than the queue's retention, edits made on the replica, a
//! first start with no origin checkpoint).
//!
//! # Exclude Projection
//!
//! Excludes are projected per root: an absolute pattern only applies to the
//! root it is nested under, rewritten relative to that root. With root
//! `/srv/www`, `/srv/www/cache/*` is passed as `cache/*` and
//! `/etc/nginx/*.bak` is dropped.
//!
//! A full sync shares the follower's single loop with the reconciler, so
//! the two never interleave. It never touches the cursor.

use super::types::FullSyncReport;
use super::FollowerContext;
use crate::metrics;
use crate::transfer::{Transfer, TransferOutcome, TransferRequest, TransferSource};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};

/// Runs whole-tree transfers for every watched root.
pub struct FullSyncDriver<T: Transfer> {
    ctx: Arc<FollowerContext<T>>,
}

impl<T: Transfer> FullSyncDriver<T> {
    pub fn new(ctx: Arc<FollowerContext<T>>) -> Self {
        Self { ctx }
    }

    /// Transfer every watched root, then trigger actions for what changed.
    ///
    /// A failed root is logged and counted; the remaining roots still run.
    pub async fn full_sync(&self) -> FullSyncReport {
        let span = info_span!("cold_path");
        async move {
            let started = Instant::now();
            let mut report = FullSyncReport {
                roots: self.ctx.watch_roots.len(),
                ..Default::default()
            };

            info!(roots = report.roots, "Starting full sync");

            for root in &self.ctx.watch_roots {
                let destination = self.ctx.replica_path(root);
                if !self.ctx.dry_run {
                    if let Err(e) = tokio::fs::create_dir_all(&destination).await {
                        warn!(root = %root.display(), error = %e, "Cannot create replica root");
                        report.failures += 1;
                        continue;
                    }
                }

                let request = TransferRequest {
                    source: TransferSource::Tree(root.clone()),
                    destination,
                    excludes: self.ctx.excludes.transfer_patterns(root),
                    files_from: None,
                };

                let (outcome, output) = self.ctx.run_transfer(request, "full_sync").await;
                match outcome {
                    TransferOutcome::Failed(status) => {
                        warn!(
                            root = %root.display(),
                            status,
                            stderr = %output.stderr.trim(),
                            "Full sync of root failed"
                        );
                        report.failures += 1;
                        report.synced_paths.extend(self.ctx.synced_paths(root, &output));
                    }
                    _ => {
                        let synced = self.ctx.synced_paths(root, &output);
                        info!(root = %root.display(), files = synced.len(), "Root synced");
                        report.synced_paths.extend(synced);
                    }
                }
            }

            if !report.synced_paths.is_empty() {
                report.actions = self.ctx.actions.trigger(&report.synced_paths);
            }

            metrics::record_full_sync(report.roots, report.failures, started.elapsed());
            info!(
                roots = report.roots,
                failures = report.failures,
                files = report.synced_paths.len(),
                duration_ms = started.elapsed().as_millis() as u64,
                "Full sync complete"
            );
            report
        }
        .instrument(span)
        .await
    }
}
