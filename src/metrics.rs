//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Reconcile cycles and cursor position
//! - Transfer invocations by mode and outcome
//! - Local deletes and triggered actions
//! - Origin-side event capture and catch-up scans
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replication_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! No exporter is installed here; the embedding process decides where
//! metrics go.
//!
//! # Usage
//!
//! ```rust,no_run
//! use tree_replication_engine::metrics;
//! use std::time::Duration;
//!
//! // In the reconciler after a cycle
//! metrics::record_cycle("advanced", Duration::from_millis(350));
//! metrics::set_cursor_version(1_718_000_042);
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Follower: reconcile cycles
// =============================================================================

/// Record a finished reconcile cycle by outcome.
pub fn record_cycle(outcome: &str, duration: Duration) {
    counter!("replication_cycles_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("replication_cycle_duration_seconds").record(duration.as_secs_f64());
}

/// Current persisted cursor.
pub fn set_cursor_version(version: u64) {
    gauge!("replication_cursor_version").set(version as f64);
}

/// Entries pending at the start of a cycle.
pub fn set_pending_entries(count: usize) {
    gauge!("replication_pending_entries").set(count as f64);
}

/// Record cursor persistence.
pub fn record_cursor_persist(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("replication_cursor_persists_total", "status" => status).increment(1);
}

/// Record one transfer invocation.
///
/// `mode` is `queue_fetch`, `entry` or `full_sync`.
pub fn record_transfer(mode: &str, outcome: &str) {
    counter!(
        "replication_transfers_total",
        "mode" => mode.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record local deletes performed for vanished sources.
pub fn record_local_deletes(count: usize) {
    if count > 0 {
        counter!("replication_local_deletes_total").increment(count as u64);
    }
}

/// Record a delete that was refused or failed.
pub fn record_delete_skipped(reason: &str) {
    counter!("replication_deletes_skipped_total", "reason" => reason.to_string()).increment(1);
}

/// Record commands launched by the action trigger.
pub fn record_actions_triggered(count: usize) {
    if count > 0 {
        counter!("replication_actions_triggered_total").increment(count as u64);
    }
}

/// Record a full reconciliation pass.
pub fn record_full_sync(roots: usize, failures: usize, duration: Duration) {
    counter!("replication_full_syncs_total").increment(1);
    counter!("replication_full_sync_roots_total").increment(roots as u64);
    if failures > 0 {
        counter!("replication_full_sync_failures_total").increment(failures as u64);
    }
    histogram!("replication_full_sync_duration_seconds").record(duration.as_secs_f64());
}

/// Record an error by type.
pub fn record_error(error_type: &str) {
    counter!("replication_errors_total", "error_type" => error_type.to_string()).increment(1);
}

/// Gauge for engine state.
pub fn set_engine_state(state: &str) {
    // 0=created, 2=running, 3=shutting down, 4=stopped, 5=failed
    let value = match state {
        "Created" => 0.0,
        "Running" => 2.0,
        "ShuttingDown" => 3.0,
        "Stopped" => 4.0,
        "Failed" => 5.0,
        _ => -1.0,
    };
    gauge!("replication_engine_state").set(value);
}

// =============================================================================
// Origin: capture, catch-up, retention
// =============================================================================

/// Record events written to an incremental entry.
pub fn record_events_recorded(count: usize) {
    counter!("replication_events_recorded_total").increment(count as u64);
}

/// Record events dropped by the event filter.
pub fn record_events_filtered(count: usize) {
    if count > 0 {
        counter!("replication_events_filtered_total").increment(count as u64);
    }
}

/// Record files found by the startup catch-up scan.
pub fn record_catchup_files(count: usize) {
    counter!("replication_catchup_files_total").increment(count as u64);
}

/// Record queue entries removed by retention.
pub fn record_retention_removed(count: usize) {
    counter!("replication_retention_removed_total").increment(count as u64);
}
