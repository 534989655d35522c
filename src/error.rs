// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replication engine.
//!
//! Errors are categorized by their source (local filesystem, transfer tool,
//! configuration, ...) and carry enough context to be actionable from a log
//! line alone.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Io` | No | Local filesystem error on state or queue files |
//! | `Config` | No | Configuration missing or invalid (fatal at startup) |
//! | `Pattern` | No | An exclude or action glob does not compile |
//! | `Transfer` | Yes | The transfer tool could not be launched or awaited |
//! | `QueueEntry` | No | A queue entry is malformed |
//! | `CorruptState` | No | Cursor or checkpoint file holds garbage |
//! | `Watch` | Yes | The filesystem notification service failed |
//! | `AlreadyRunning` | No | Another instance holds the pid file |
//! | `InvalidState` | No | Engine state machine violation |
//! | `Internal` | No | Unexpected internal error |
//!
//! A transfer that *runs* and exits non-zero is not an error at this level:
//! it is classified into a [`TransferOutcome`](crate::transfer::TransferOutcome)
//! and recovered by not advancing the version cursor.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur during replication.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Local filesystem error.
    ///
    /// Not retryable: state files the follower owns exclusively should never
    /// be contended, so a failure here needs operator attention.
    #[error("I/O error ({operation}) on {}: {source}", path.display())]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A glob pattern failed to compile.
    #[error("Invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// The transfer tool could not be launched or its output collected.
    #[error("Transfer error: {message}")]
    Transfer {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Malformed queue entry.
    #[error("Queue entry error: {0}")]
    QueueEntry(String),

    /// A persisted scalar (cursor, checkpoint) cannot be parsed.
    #[error("Corrupt state file {}: {message}", path.display())]
    CorruptState { path: PathBuf, message: String },

    /// Filesystem notification failure.
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Another instance is already running against the same state.
    #[error("Another instance is running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    /// Engine state machine violation.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplicationError {
    /// Create an I/O error with the operation and path that failed.
    pub fn io(operation: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }

    /// Create a transfer error from a launch/wait failure.
    pub fn transfer(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Transfer {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a transfer error without source
    pub fn transfer_msg(message: impl Into<String>) -> Self {
        Self::Transfer {
            message: message.into(),
            source: None,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transfer { .. } => true, // next cycle retries the same pending set
            Self::Watch(_) => true,
            Self::Io { .. } => false,
            Self::Config(_) => false,
            Self::Pattern { .. } => false,
            Self::QueueEntry(_) => false,
            Self::CorruptState { .. } => false,
            Self::AlreadyRunning { .. } => false,
            Self::InvalidState { .. } => false,
            Self::Internal(_) => false,
        }
    }
}
