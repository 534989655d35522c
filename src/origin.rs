// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Origin engine.
//!
//! Ties together the capture side of the replication:
//! - [`TreeWatcher`] for live events
//! - the event filter ([`ExcludeSet::accept`])
//! - [`ChangeLogWriter`] for durable queue entries
//! - [`OutOfSyncScanner`] for changes made while the origin was down
//! - [`QueueRetention`] for optional queue compaction
//!
//! # Loop
//!
//! ```text
//! start watcher → catch-up scan → every poll interval:
//!     drain events → filter → write <now>.incremental
//!     → checkpoint = now → retention (at most hourly)
//! ```
//!
//! The watcher starts before the scan so nothing changed during the scan is
//! lost; a file reported by both is simply transferred twice. The checkpoint
//! is refreshed every iteration and on shutdown, so the next startup scan
//! covers exactly the downtime.

use crate::change_log::{current_version, ChangeLogWriter};
use crate::config::ReplicationConfig;
use crate::coordinator::EngineState;
use crate::cursor::CheckpointStore;
use crate::error::{ReplicationError, Result};
use crate::filter::ExcludeSet;
use crate::metrics;
use crate::queue::{ChangeEvent, QueueDir, QueueEntry};
use crate::retention::QueueRetention;
use crate::scanner::OutOfSyncScanner;
use crate::watcher::TreeWatcher;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// The origin side of the replication.
pub struct OriginEngine {
    roots: Vec<PathBuf>,
    excludes: ExcludeSet,
    writer: ChangeLogWriter,
    checkpoint: CheckpointStore,
    scanner: OutOfSyncScanner,
    retention: Option<QueueRetention>,
    poll_interval: Duration,
    /// Accepted events not yet durable (kept across a failed write).
    unwritten: Vec<ChangeEvent>,
    state_tx: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,
}

impl OriginEngine {
    pub fn from_config(config: &ReplicationConfig) -> Result<Self> {
        let origin = &config.origin;
        let excludes = ExcludeSet::new(
            origin
                .excludes
                .iter()
                .chain(origin.watch_excludes.iter())
                .cloned(),
        )?
        .with_working_dirs(config.paths.working_dirs());

        let queue = QueueDir::new(&config.paths.queue_dir);
        let writer = ChangeLogWriter::new(queue.clone());
        let checkpoint = CheckpointStore::new(config.paths.checkpoint_file());
        let scanner = OutOfSyncScanner::new(
            origin.watch_paths.clone(),
            excludes.clone(),
            writer.clone(),
            checkpoint.clone(),
        );
        let retention = origin
            .retention_duration()
            .map(|window| QueueRetention::new(queue, window));
        let (state_tx, state_rx) = watch::channel(EngineState::Created);

        Ok(Self {
            roots: origin.watch_paths.clone(),
            excludes,
            writer,
            checkpoint,
            scanner,
            retention,
            poll_interval: origin.poll_interval_duration(),
            unwritten: Vec::new(),
            state_tx,
            state_rx,
        })
    }

    /// Override the poll interval (tests use sub-second intervals).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    pub fn excludes(&self) -> &ExcludeSet {
        &self.excludes
    }

    fn set_state(&self, state: EngineState) {
        let _ = self.state_tx.send(state);
        metrics::set_engine_state(&state.to_string());
    }

    /// Startup catch-up scan.
    pub async fn catch_up(&self) -> Result<Option<QueueEntry>> {
        self.scanner.scan().await
    }

    /// Filter a batch of events and write the survivors as one entry.
    ///
    /// On a write error the accepted events are kept and retried with the
    /// next batch.
    pub async fn record_batch(&mut self, events: Vec<ChangeEvent>) -> Result<Option<QueueEntry>> {
        let total = events.len();
        let accepted: Vec<ChangeEvent> = events
            .into_iter()
            .filter(|e| self.excludes.accept(e))
            .collect();
        metrics::record_events_filtered(total - accepted.len());
        self.unwritten.extend(accepted);

        if self.unwritten.is_empty() {
            return Ok(None);
        }
        let entry = self.writer.record(&self.unwritten).await?;
        self.unwritten.clear();
        Ok(entry)
    }

    /// Store `taken_at`, which must be read before the batch it covers was
    /// drained from the watcher.
    async fn refresh_checkpoint(&self, taken_at: u64) {
        let now = taken_at as i64;
        if let Err(e) = self.checkpoint.store(now).await {
            warn!(error = %e, "Failed to refresh checkpoint");
        }
    }

    async fn iteration(&mut self, watcher: &mut TreeWatcher) {
        let taken_at = current_version();
        let events = watcher.drain();
        if let Err(e) = self.record_batch(events).await {
            error!(error = %e, pending = self.unwritten.len(), "Failed to write queue entry, will retry");
        }
        self.refresh_checkpoint(taken_at).await;

        if let Some(retention) = self.retention.as_mut() {
            if let Err(e) = retention.maybe_compact(current_version()).await {
                warn!(error = %e, "Queue retention failed");
            }
        }
    }

    /// Run until `shutdown_rx` turns `true` (or its sender is dropped).
    pub async fn run(&mut self, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        if self.state() != EngineState::Created {
            return Err(ReplicationError::InvalidState {
                expected: "Created".to_string(),
                actual: self.state().to_string(),
            });
        }
        let _ = shutdown_rx.borrow_and_update();

        let span = info_span!("origin");
        async move {
            let mut watcher = match TreeWatcher::start(&self.roots) {
                Ok(watcher) => watcher,
                Err(e) => {
                    self.set_state(EngineState::Failed);
                    return Err(e);
                }
            };

            if let Err(e) = self.catch_up().await {
                self.set_state(EngineState::Failed);
                return Err(e);
            }

            self.set_state(EngineState::Running);
            info!(
                roots = self.roots.len(),
                poll_interval_secs = self.poll_interval.as_secs_f64(),
                retention = self.retention.is_some(),
                "Origin engine running"
            );

            let mut timer = tokio::time::interval(self.poll_interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Shutdown signal received, flushing last batch");
                            break;
                        }
                        continue;
                    }

                    _ = timer.tick() => {
                        self.iteration(&mut watcher).await;
                    }
                }
            }

            self.set_state(EngineState::ShuttingDown);
            let taken_at = current_version();
            let events = watcher.drain();
            if let Err(e) = self.record_batch(events).await {
                error!(error = %e, lost = self.unwritten.len(), "Final queue write failed");
            }
            self.refresh_checkpoint(taken_at).await;
            debug!("Watcher stopped");

            self.set_state(EngineState::Stopped);
            info!("Origin engine stopped");
            Ok(())
        }
        .instrument(span)
        .await
    }
}
