//! Engine state and cycle report types.
//!
//! # State Transitions
//!
//! ```text
//!                  run()
//! Created ───────────────────→ Running ──────────┐
//!    │                              │            │
//!    │ (shutdown before run)        │ shutdown   │ (cursor cannot be
//!    ↓                              ↓            │  read or persisted)
//! Stopped ←──────────────── ShuttingDown         ↓
//!                                              Failed
//! ```
//!
//! - **Created**: Initial state after `FollowerEngine::new()`.
//! - **Running**: Reconcile cycles (and full syncs, if enabled) are running.
//! - **ShuttingDown**: Shutdown observed between cycles.
//! - **Stopped**: Loop exited cleanly. Safe to drop.
//! - **Failed**: Unrecoverable cycle error. Engine cannot continue.

use crate::transfer::TransferOutcome;
use std::path::PathBuf;

/// State of the follower engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Engine created but not started.
    Created,

    /// Running reconcile cycles.
    Running,

    /// Shutting down at a cycle boundary.
    ShuttingDown,

    /// Stopped.
    Stopped,

    /// Unrecoverable error. Check logs for details.
    Failed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Created => write!(f, "Created"),
            EngineState::Running => write!(f, "Running"),
            EngineState::ShuttingDown => write!(f, "ShuttingDown"),
            EngineState::Stopped => write!(f, "Stopped"),
            EngineState::Failed => write!(f, "Failed"),
        }
    }
}

/// How a reconcile cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing pending.
    Idle,
    /// Cursor persisted at a new value.
    Advanced,
    /// Every entry succeeded but the cursor did not move.
    Unchanged,
    /// At least one hard failure: cursor left at its pre-cycle value.
    Retry,
    /// Dry run: nothing persisted.
    DryRun,
}

impl CycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleOutcome::Idle => "idle",
            CycleOutcome::Advanced => "advanced",
            CycleOutcome::Unchanged => "unchanged",
            CycleOutcome::Retry => "retry",
            CycleOutcome::DryRun => "dry_run",
        }
    }
}

/// Result of one transfer of one queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryResult {
    pub name: String,
    pub version: u64,
    pub outcome: TransferOutcome,
}

/// What a reconcile cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub cursor_before: u64,
    /// Cursor after the cycle. Equal to `cursor_before` unless advanced;
    /// in dry-run mode, the value that would have been persisted.
    pub cursor_after: u64,
    pub entries: Vec<EntryResult>,
    /// Origin-absolute paths synced or deleted this cycle.
    pub synced_paths: Vec<PathBuf>,
    /// Local paths removed for vanished sources.
    pub deleted_paths: Vec<PathBuf>,
    /// Commands handed to the action trigger.
    pub actions: Vec<String>,
}

impl CycleReport {
    pub fn idle(cursor: u64) -> Self {
        Self {
            outcome: CycleOutcome::Idle,
            cursor_before: cursor,
            cursor_after: cursor,
            entries: Vec::new(),
            synced_paths: Vec::new(),
            deleted_paths: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn failed(&self) -> bool {
        self.outcome == CycleOutcome::Retry
    }
}

/// What a full reconciliation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FullSyncReport {
    pub roots: usize,
    pub failures: usize,
    pub synced_paths: Vec<PathBuf>,
    pub actions: Vec<String>,
}
