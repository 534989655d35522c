// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Queue retention (origin side).
//!
//! The reconciler never deletes queue entries. Left alone the queue grows
//! without bound, so the origin optionally removes entries older than a
//! configured window, at most once per [`RETENTION_CHECK_INTERVAL`]. This
//! runs on the origin between poll iterations, never inside a follower
//! cycle.
//!
//! The origin cannot see follower cursors, so the window is measured from
//! the origin clock: an entry is expired when `version < now - window`. A
//! follower lagging by more than the window needs a full sync to catch up.

use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::queue::{QueueDir, QueueEntry};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Minimum spacing between two compaction passes.
pub const RETENTION_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

/// Entries strictly older than `now - window`.
pub fn expired(entries: &[QueueEntry], now: u64, window: Duration) -> Vec<QueueEntry> {
    let cutoff = now.saturating_sub(window.as_secs());
    entries
        .iter()
        .filter(|e| e.version < cutoff)
        .cloned()
        .collect()
}

/// Time-window compaction of a queue directory.
#[derive(Debug)]
pub struct QueueRetention {
    queue: QueueDir,
    window: Duration,
    last_run: Option<Instant>,
}

impl QueueRetention {
    pub fn new(queue: QueueDir, window: Duration) -> Self {
        Self {
            queue,
            window,
            last_run: None,
        }
    }

    /// Compact if the last pass is older than [`RETENTION_CHECK_INTERVAL`].
    pub async fn maybe_compact(&mut self, now: u64) -> Result<usize> {
        if let Some(last) = self.last_run {
            if last.elapsed() < RETENTION_CHECK_INTERVAL {
                return Ok(0);
            }
        }
        self.last_run = Some(Instant::now());
        self.compact_at(now).await
    }

    /// Remove every expired entry. Returns the number removed.
    pub async fn compact_at(&self, now: u64) -> Result<usize> {
        let entries = self.queue.list().await?;
        let expired = expired(&entries, now, self.window);
        if expired.is_empty() {
            debug!("No expired queue entries");
            return Ok(0);
        }

        let mut removed = 0;
        for entry in &expired {
            match tokio::fs::remove_file(&entry.path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    let err = ReplicationError::io("remove expired entry", &entry.path, e);
                    warn!(error = %err, "Retention could not remove entry");
                }
            }
        }

        metrics::record_retention_removed(removed);
        info!(
            removed,
            window_secs = self.window.as_secs(),
            "Expired queue entries removed"
        );
        Ok(removed)
    }
}
