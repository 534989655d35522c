// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Follower engine coordinator.
//!
//! The main orchestrator that ties together:
//! - Queue reconciliation (hot path) via [`QueueReconciler`]
//! - Full reconciliation (cold path) via [`FullSyncDriver`]
//! - Cursor persistence via [`crate::cursor::CursorStore`]
//! - Post-sync hooks via [`crate::actions::ActionTrigger`]
//!
//! # Architecture
//!
//! Everything runs on one task. Each loop iteration waits for the next
//! reconcile tick, the next full-sync tick or shutdown, then runs that one
//! unit of work to completion. A transfer blocks the loop until it exits,
//! and shutdown is only observed between units of work.

mod cold_path;
mod hot_path;
mod types;

pub use cold_path::FullSyncDriver;
pub use hot_path::{next_cursor, QueueReconciler};
pub use types::{CycleOutcome, CycleReport, EngineState, EntryResult, FullSyncReport};

use crate::actions::ActionTrigger;
use crate::config::ReplicationConfig;
use crate::cursor::CursorStore;
use crate::error::{ReplicationError, Result};
use crate::filter::ExcludeSet;
use crate::metrics;
use crate::queue::QueueDir;
use crate::transfer::{
    absolutize, prepare_secret_file, RsyncTransfer, Transfer, TransferOutcome, TransferOutput,
    TransferRequest,
};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn, Instrument};

/// Shared by the hot and cold paths of one follower.
pub struct FollowerContext<T: Transfer> {
    pub transfer: Arc<T>,
    /// Origin excludes extended by the follower's, plus working dirs.
    pub excludes: ExcludeSet,
    pub watch_roots: Vec<PathBuf>,
    pub replica_root: PathBuf,
    pub vanished_exit_codes: Vec<i32>,
    pub actions: ActionTrigger,
    pub dry_run: bool,
}

impl<T: Transfer> FollowerContext<T> {
    pub fn from_config(config: &ReplicationConfig, transfer: Arc<T>) -> Result<Self> {
        let follower = config.follower()?;
        let excludes = ExcludeSet::new(config.origin.excludes.iter().cloned())?
            .extended(follower.excludes.iter().cloned())?
            .with_working_dirs(config.paths.working_dirs());

        Ok(Self {
            transfer,
            excludes,
            watch_roots: config.origin.watch_paths.clone(),
            replica_root: follower.replica_root.clone(),
            vanished_exit_codes: follower.transfer.vanished_exit_codes.clone(),
            actions: ActionTrigger::new(&follower.actions, follower.dry_run)?,
            dry_run: follower.dry_run,
        })
    }

    /// Run one transfer and classify it.
    ///
    /// A transfer that cannot be launched at all counts as a hard failure.
    pub async fn run_transfer(
        &self,
        request: TransferRequest,
        mode: &str,
    ) -> (TransferOutcome, TransferOutput) {
        match self.transfer.run(request).await {
            Ok(output) => {
                let outcome = TransferOutcome::classify(output.exit_status, &self.vanished_exit_codes);
                metrics::record_transfer(mode, outcome.as_str());
                (outcome, output)
            }
            Err(e) => {
                warn!(mode, error = %e, "Transfer could not run");
                metrics::record_error("transfer");
                metrics::record_transfer(mode, "failed");
                (TransferOutcome::Failed(-1), TransferOutput::failed(-1, e.to_string()))
            }
        }
    }

    /// Origin-absolute paths of the files a transfer rooted at `root` reported.
    pub fn synced_paths(&self, root: &Path, output: &TransferOutput) -> Vec<PathBuf> {
        output
            .produced_files()
            .iter()
            .map(|rel| absolutize(root, rel))
            .collect()
    }

    /// Where an origin-absolute path lives in the replica.
    pub fn replica_path(&self, origin_path: &Path) -> PathBuf {
        let relative = origin_path.strip_prefix("/").unwrap_or(origin_path);
        if relative.as_os_str().is_empty() {
            self.replica_root.clone()
        } else {
            self.replica_root.join(relative)
        }
    }

    /// Whether a delete line may touch the replica: absolute, no `..`, and
    /// strictly below one of the watched roots.
    pub fn is_deletable(&self, origin_path: &Path) -> bool {
        if !origin_path.is_absolute()
            || origin_path.components().any(|c| matches!(c, Component::ParentDir))
        {
            return false;
        }
        self.watch_roots
            .iter()
            .any(|root| origin_path != root && origin_path.starts_with(root))
    }
}

/// The follower engine.
///
/// Owns one [`QueueReconciler`] and one [`FullSyncDriver`] sharing a
/// [`FollowerContext`], and runs them on a single loop.
pub struct FollowerEngine<T: Transfer = RsyncTransfer> {
    reconciler: QueueReconciler<T>,
    full_sync: FullSyncDriver<T>,
    poll_interval: Duration,
    full_sync_interval: Option<Duration>,
    initial_full_sync: bool,
    state_tx: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,
}

impl FollowerEngine<RsyncTransfer> {
    /// Create an engine driving the configured rsync-compatible tool.
    ///
    /// Writes the secret file if a password is configured.
    pub fn from_config(config: &ReplicationConfig) -> Result<Self> {
        let follower = config.follower()?;
        let secret_file = prepare_secret_file(&config.paths, &follower.transfer)?;
        let transfer = RsyncTransfer::new(
            follower.transfer.clone(),
            follower.origin_host.clone(),
            secret_file,
            follower.dry_run,
        );
        Self::with_transfer(config, Arc::new(transfer))
    }
}

impl<T: Transfer> FollowerEngine<T> {
    /// Create an engine with an explicit transfer primitive.
    ///
    /// The engine starts in `Created` state.
    pub fn with_transfer(config: &ReplicationConfig, transfer: Arc<T>) -> Result<Self> {
        let follower = config.follower()?;
        let ctx = Arc::new(FollowerContext::from_config(config, transfer)?);

        let reconciler = QueueReconciler::new(
            Arc::clone(&ctx),
            QueueDir::new(&config.paths.queue_dir),
            CursorStore::new(config.paths.cursor_file()),
            follower.end_sync_file.clone(),
        );
        let (state_tx, state_rx) = watch::channel(EngineState::Created);

        Ok(Self {
            reconciler,
            full_sync: FullSyncDriver::new(ctx),
            poll_interval: follower.poll_interval_duration(),
            full_sync_interval: follower.full_sync_interval_duration(),
            initial_full_sync: follower.initial_full_sync,
            state_tx,
            state_rx,
        })
    }

    /// Get current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), EngineState::Running)
    }

    pub fn reconciler(&self) -> &QueueReconciler<T> {
        &self.reconciler
    }

    pub fn full_sync_driver(&self) -> &FullSyncDriver<T> {
        &self.full_sync
    }

    /// Override the reconcile interval (tests use sub-second intervals).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run a single reconcile cycle (`follower --once`).
    pub async fn run_once(&self) -> Result<CycleReport> {
        self.reconciler.reconcile_cycle().await
    }

    /// Run a single full reconciliation (`full-sync`).
    pub async fn run_full_sync(&self) -> FullSyncReport {
        self.full_sync.full_sync().await
    }

    fn set_state(&self, state: EngineState) {
        let _ = self.state_tx.send(state);
        metrics::set_engine_state(&state.to_string());
    }

    /// Run until `shutdown_rx` turns `true` (or its sender is dropped).
    ///
    /// Returns `Err` only for an unrecoverable cycle error, after moving to
    /// [`EngineState::Failed`].
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        if self.state() != EngineState::Created {
            return Err(ReplicationError::InvalidState {
                expected: "Created".to_string(),
                actual: self.state().to_string(),
            });
        }

        // Mark initial shutdown value as seen so changed() only fires on actual changes
        if *shutdown_rx.borrow_and_update() {
            self.set_state(EngineState::Stopped);
            return Ok(());
        }

        self.set_state(EngineState::Running);
        info!(
            poll_interval_secs = self.poll_interval.as_secs_f64(),
            full_sync_interval_secs = self.full_sync_interval.map(|d| d.as_secs()),
            initial_full_sync = self.initial_full_sync,
            "Follower engine running"
        );

        let result = self.run_loop(&mut shutdown_rx).instrument(tracing::info_span!("follower")).await;

        match &result {
            Ok(()) => {
                self.set_state(EngineState::ShuttingDown);
                self.set_state(EngineState::Stopped);
                info!("Follower engine stopped");
            }
            Err(e) => {
                error!(error = %e, "Follower engine failed");
                self.set_state(EngineState::Failed);
            }
        }
        result
    }

    async fn run_loop(&self, shutdown_rx: &mut watch::Receiver<bool>) -> Result<()> {
        if self.initial_full_sync {
            self.full_sync.full_sync().await;
        }

        let mut cycle_timer = tokio::time::interval(self.poll_interval);
        // Skip missed ticks instead of bursting to catch up
        cycle_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut full_sync_timer = self.full_sync_interval.map(|every| {
            let mut timer = tokio::time::interval_at(Instant::now() + every, every);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            timer
        });

        loop {
            tokio::select! {
                biased;

                // Priority: check shutdown first
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping at cycle boundary");
                        return Ok(());
                    }
                    continue;
                }

                _ = tick_optional(&mut full_sync_timer) => {
                    self.full_sync.full_sync().await;
                }

                _ = cycle_timer.tick() => {
                    match self.reconciler.reconcile_cycle().await {
                        Ok(report) => {
                            debug!(
                                outcome = report.outcome.as_str(),
                                cursor = report.cursor_after,
                                entries = report.entries.len(),
                                "Cycle finished"
                            );
                        }
                        Err(e) if e.is_retryable() => {
                            warn!(error = %e, "Cycle error, retrying next cycle");
                        }
                        Err(e) => {
                            metrics::record_error("cycle");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}

/// Tick `timer` if present; never completes otherwise.
async fn tick_optional(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
