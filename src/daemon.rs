// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Process plumbing: single-instance lock and signal-driven shutdown.
//!
//! Two reconcilers advancing the same cursor over the same replica would
//! race, so each role holds an exclusive lock on its pid file for the life
//! of the process. SIGTERM and SIGINT flip a `watch` channel to `true`; the
//! engines observe it between cycles.

use crate::error::{ReplicationError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// An exclusively locked pid file, emptied on drop.
///
/// The file itself is never unlinked: a waiter may already hold a handle to
/// this inode, and a fresh file at the same path would let two processes
/// lock different inodes.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    file: File,
}

impl PidFile {
    /// Lock `path` and record our pid in it.
    ///
    /// Fails with [`ReplicationError::AlreadyRunning`] if another process
    /// holds the lock.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| ReplicationError::io("open pid file", &path, e))?;

        let recorded = read_pid(&mut file);

        if FileExt::try_lock_exclusive(&file).is_err() {
            return Err(ReplicationError::AlreadyRunning {
                pid: recorded.unwrap_or(0),
            });
        }

        let own = std::process::id();
        if let Some(pid) = recorded.filter(|pid| *pid != own) {
            if process_alive(pid) {
                warn!(pid, path = %path.display(), "Pid file names a live process but was not locked, taking over");
            } else {
                debug!(pid, "Replacing stale pid file");
            }
        }

        file.set_len(0)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .and_then(|_| writeln!(file, "{}", own))
            .and_then(|_| file.sync_all())
            .map_err(|e| ReplicationError::io("write pid file", &path, e))?;

        info!(pid = own, path = %path.display(), "Pid file locked");
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = self.file.set_len(0) {
            warn!(path = %self.path.display(), error = %e, "Failed to clear pid file");
        }
        let _ = FileExt::unlock(&self.file);
    }
}

fn read_pid(file: &mut File) -> Option<u32> {
    let mut raw = String::new();
    file.read_to_string(&mut raw).ok()?;
    raw.trim().parse().ok()
}

/// Whether a process with this pid exists.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs permission and existence checks only
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    false
}

/// Spawn a task that turns SIGTERM/SIGINT into a shutdown signal.
///
/// Must be called from within a tokio runtime.
pub fn shutdown_on_signal() -> Result<watch::Receiver<bool>> {
    let (tx, rx) = watch::channel(false);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| ReplicationError::Internal(format!("cannot register SIGTERM handler: {}", e)))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| ReplicationError::Internal(format!("cannot register SIGINT handler: {}", e)))?;

        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
            let _ = tx.send(true);
        });
    }

    #[cfg(not(unix))]
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C");
        }
        let _ = tx.send(true);
    });

    Ok(rx)
}
