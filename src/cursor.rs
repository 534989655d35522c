// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persistence for the single-scalar state files.
//!
//! - [`CursorStore`]: the follower's version cursor, "highest queue version
//!   fully applied". Starts at 1, never decreases.
//! - [`CheckpointStore`]: the origin's last-run timestamp, consumed by the
//!   out-of-sync scanner.
//! - [`write_end_marker`]: the end-of-cycle marker read by health checks.
//!
//! All three are plain text integers. Writes go to a sibling temp file which
//! is synced and renamed over the target, so a crash leaves either the old
//! or the new value and never a torn one.
//!
//! ## Cursor Semantics
//!
//! The cursor is only persisted after a cycle in which every transfer
//! succeeded. On restart the follower re-reads every entry with
//! `version >= cursor`; re-applying an entry is idempotent.
//!
//! ```text
//! transfer 1718000042.incremental → ok → persist cursor 1718000042
//!                                  (crash here = re-apply, idempotent)
//! ```

use crate::error::{ReplicationError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Cursor value when no cursor file exists yet.
pub const INITIAL_CURSOR: u64 = 1;

const WRITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const WRITE_RETRY_BASE_DELAY_MS: u64 = 10;
const WRITE_RETRY_MAX_DELAY_MS: u64 = 500;

/// Transient I/O errors worth another attempt.
fn is_transient_io_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

/// Execute a file operation with retry on transient errors.
async fn execute_with_retry<F, Fut, T>(operation_name: &str, mut f: F) -> std::io::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::io::Result<T>>,
{
    let mut attempts = 0;
    let mut delay_ms = WRITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(operation = operation_name, attempts, "State write succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if is_transient_io_error(&e) && attempts < WRITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = WRITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    error = %e,
                    "State write failed transiently, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(WRITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Parse the first non-blank line as an integer. Accepts a trailing
/// fractional part (`"1718000000.0"`), which older writers produced.
fn parse_scalar(path: &Path, raw: &str) -> Result<Option<i64>> {
    let Some(line) = raw.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return Ok(None);
    };
    let integral = line.split_once('.').map(|(i, _)| i).unwrap_or(line);
    integral
        .parse::<i64>()
        .map(Some)
        .map_err(|_| ReplicationError::CorruptState {
            path: path.to_path_buf(),
            message: format!("not a number: '{}'", line),
        })
}

async fn read_scalar(path: &Path) -> Result<Option<i64>> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => parse_scalar(path, &raw),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ReplicationError::io("read state file", path, e)),
    }
}

async fn write_scalar(operation: &str, path: &Path, value: i64) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let body = value.to_string();

    execute_with_retry(operation, || async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(body.as_bytes()).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp, path).await
    })
    .await
    .map_err(|e| ReplicationError::io(operation, path, e))
}

/// The follower's version cursor.
#[derive(Debug, Clone)]
pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Current cursor, or [`INITIAL_CURSOR`] on first run.
    pub async fn load(&self) -> Result<u64> {
        match read_scalar(&self.path).await? {
            Some(v) if v >= 0 => Ok((v as u64).max(INITIAL_CURSOR)),
            Some(v) => Err(ReplicationError::CorruptState {
                path: self.path.clone(),
                message: format!("negative cursor {}", v),
            }),
            None => {
                debug!(path = %self.path.display(), "No cursor yet, starting from {}", INITIAL_CURSOR);
                Ok(INITIAL_CURSOR)
            }
        }
    }

    /// Persist a new cursor value.
    pub async fn store(&self, version: u64) -> Result<()> {
        let value = i64::try_from(version).map_err(|_| {
            ReplicationError::Internal(format!("cursor {} does not fit the state file", version))
        })?;
        write_scalar("cursor_store", &self.path, value).await?;
        info!(version, "Cursor persisted");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The origin's last-run checkpoint (seconds since epoch).
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Last checkpoint, `None` on first run.
    pub async fn load(&self) -> Result<Option<i64>> {
        read_scalar(&self.path).await
    }

    pub async fn store(&self, timestamp: i64) -> Result<()> {
        write_scalar("checkpoint_store", &self.path, timestamp).await?;
        debug!(timestamp, "Checkpoint updated");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Rewrite the end-of-cycle marker with the committed version.
pub async fn write_end_marker(path: &Path, version: u64) -> Result<()> {
    tokio::fs::write(path, version.to_string())
        .await
        .map_err(|e| ReplicationError::io("write end marker", path, e))
}
