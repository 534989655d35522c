//! # Tree Replication Engine
//!
//! Replicates a filesystem tree from one origin host to any number of
//! followers, using near-real-time change capture plus periodic full
//! reconciliation to correct drift.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────── origin ─────────────────────────┐
//! │                                                         │
//! │  ┌─────────────┐   ┌──────────────┐   ┌──────────────┐  │
//! │  │ TreeWatcher │──►│ ExcludeSet   │──►│ ChangeLog    │──┼──► data/<version>.<kind>
//! │  │ (notify)    │   │ (event filter│   │ Writer       │  │
//! │  └─────────────┘   └──────────────┘   └──────────────┘  │
//! │  ┌──────────────────┐ startup: ctime > checkpoint       │
//! │  │ OutOfSyncScanner │──────────────────────► .catchup   │
//! │  └──────────────────┘                                   │
//! └─────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────── follower ────────────────────────┐
//! │                                                         │
//! │  ┌──────────────┐  pending = version >= cursor          │
//! │  │ Queue        │──► transfer --files-from=<entry>      │
//! │  │ Reconciler   │    clean / vanished / failed          │
//! │  │ (hot path)   │──► local deletes, cursor advance      │
//! │  └──────────────┘              │                        │
//! │  ┌──────────────┐              ▼                        │
//! │  │ FullSync     │──►  ActionTrigger (detached hooks)    │
//! │  │ (cold path)  │                                       │
//! │  └──────────────┘                                       │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two-Path Replication
//!
//! 1. **Hot Path (queue)**: the origin batches filesystem events into
//!    versioned, append-only queue entries; followers apply them in version
//!    order and advance a monotonic cursor.
//! 2. **Cold Path (full sync)**: each watched root is transferred whole on a
//!    timer, catching anything the queue missed.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tree_replication_engine::{FollowerEngine, ReplicationConfig, Role};
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> tree_replication_engine::Result<()> {
//!     let config = ReplicationConfig::from_file("replicator.yaml", Role::Follower)?;
//!     let (_tx, rx) = watch::channel(false);
//!
//!     let engine = FollowerEngine::from_config(&config)?;
//!     // Runs until the shutdown channel turns true
//!     engine.run(rx).await
//! }
//! ```

pub mod actions;
pub mod change_log;
pub mod config;
pub mod coordinator;
pub mod cursor;
pub mod daemon;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod origin;
pub mod queue;
pub mod retention;
pub mod scanner;
pub mod transfer;
pub mod watcher;

// Re-exports for convenience
pub use actions::ActionTrigger;
pub use change_log::ChangeLogWriter;
pub use config::{
    ActionRule, FollowerConfig, OriginConfig, PathsConfig, ReplicationConfig, Role, TransferConfig,
};
pub use coordinator::{
    CycleOutcome, CycleReport, EngineState, FollowerContext, FollowerEngine, FullSyncDriver,
    FullSyncReport, QueueReconciler,
};
pub use cursor::{CheckpointStore, CursorStore};
pub use daemon::PidFile;
pub use error::{ReplicationError, Result};
pub use filter::ExcludeSet;
pub use origin::OriginEngine;
pub use queue::{ChangeEvent, EntryKind, QueueDir, QueueEntry, QueueLine};
pub use scanner::OutOfSyncScanner;
pub use transfer::{
    RsyncTransfer, Transfer, TransferOutcome, TransferOutput, TransferRequest, TransferSource,
};
