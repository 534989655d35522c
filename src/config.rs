// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the replication engine.
//!
//! This module defines all configuration types needed to run either side of
//! the replication. One file describes both roles: the `origin` section is
//! authoritative (watch roots and excludes are shared with every follower),
//! the `follower` section is only required on followers.
//!
//! Configuration is loaded once at startup via
//! [`ReplicationConfig::from_file()`] and passed by value into component
//! constructors. There is no process-wide configuration singleton.
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicationConfig
//! ├── origin: OriginConfig          # watch roots, excludes, poll interval
//! ├── paths: PathsConfig            # state dir + queue dir
//! ├── follower: FollowerConfig?     # follower-only
//! │   ├── transfer: TransferConfig  # rsync-compatible transfer tool
//! │   └── actions: Vec<ActionRule>  # post-sync hooks
//! ├── verbose: bool
//! └── log_file: Option<PathBuf>
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! origin:
//!   watch_paths: [/srv/www, /etc/nginx]
//!   excludes: ["*.tmp", "/srv/www/cache/*"]
//!   poll_interval: "5s"
//!
//! follower:
//!   origin_host: front1
//!   full_sync_interval: "1h"
//!   transfer:
//!     user: replicator
//!     password: "s3cret"
//!   actions:
//!     - pattern: "/etc/nginx/*"
//!       command: "service nginx reload"
//! ```

use crate::error::{ReplicationError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Poll intervals below this are clamped up.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Which side of the replication this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Origin,
    Follower,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Origin => write!(f, "origin"),
            Role::Follower => write!(f, "follower"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Origin settings. Authoritative for watch roots and excludes.
    pub origin: OriginConfig,

    /// Working directories of this process.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Follower settings; required when running as a follower.
    #[serde(default)]
    pub follower: Option<FollowerConfig>,

    /// Log at debug level.
    #[serde(default)]
    pub verbose: bool,

    /// Append logs to this file instead of stderr.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl ReplicationConfig {
    /// Load, normalize and validate a YAML configuration file.
    pub fn from_file(path: impl AsRef<Path>, role: Role) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ReplicationError::Config(format!(
                "Configuration file {} is not readable: {}",
                path.display(),
                e
            ))
        })?;
        let mut config = Self::from_yaml(&raw)?;
        config.normalize()?;
        config.validate(role)?;
        Ok(config)
    }

    /// Parse a YAML document without normalizing or validating it.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw)
            .map_err(|e| ReplicationError::Config(format!("Invalid configuration: {}", e)))
    }

    /// Make every configured path absolute (relative to the working directory).
    pub fn normalize(&mut self) -> Result<()> {
        for root in self.origin.watch_paths.iter_mut() {
            *root = absolute(root)?;
        }
        self.paths.state_dir = absolute(&self.paths.state_dir)?;
        self.paths.queue_dir = absolute(&self.paths.queue_dir)?;
        if let Some(follower) = self.follower.as_mut() {
            follower.replica_root = absolute(&follower.replica_root)?;
        }
        Ok(())
    }

    /// Check that everything `role` needs is present and well-formed.
    pub fn validate(&self, role: Role) -> Result<()> {
        if self.origin.watch_paths.is_empty() {
            return Err(ReplicationError::Config("no paths given to watch".to_string()));
        }
        parse_duration_setting("origin.poll_interval", &self.origin.poll_interval)?;
        if let Some(retention) = &self.origin.retention {
            parse_duration_setting("origin.retention", retention)?;
        }

        if role == Role::Follower {
            let follower = self.follower()?;
            if follower.origin_host.trim().is_empty() {
                return Err(ReplicationError::Config("No origin host is set".to_string()));
            }
            if follower.transfer.user.trim().is_empty() {
                return Err(ReplicationError::Config("No transfer user is set".to_string()));
            }
            if follower.transfer.password.is_none() && follower.transfer.secret_file.is_none() {
                return Err(ReplicationError::Config(
                    "Either transfer.password or transfer.secret_file must be set".to_string(),
                ));
            }
            parse_duration_setting("follower.poll_interval", &follower.poll_interval)?;
            if let Some(interval) = &follower.full_sync_interval {
                parse_duration_setting("follower.full_sync_interval", interval)?;
            }
        }
        Ok(())
    }

    /// The follower section, or a configuration error if absent.
    pub fn follower(&self) -> Result<&FollowerConfig> {
        self.follower
            .as_ref()
            .ok_or_else(|| ReplicationError::Config("No follower section configured".to_string()))
    }

    /// Create a minimal config for testing, rooted in `base`.
    ///
    /// Watches `base/tree`, keeps state in `base/var` and the queue in `base/data`.
    pub fn for_testing(base: &Path) -> Self {
        Self {
            origin: OriginConfig {
                watch_paths: vec![base.join("tree")],
                ..Default::default()
            },
            paths: PathsConfig {
                state_dir: base.join("var"),
                queue_dir: base.join("data"),
            },
            follower: Some(FollowerConfig::for_testing(base.join("replica"))),
            verbose: true,
            log_file: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OriginConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Origin-side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginConfig {
    /// Roots of the replicated tree. Made absolute on load.
    #[serde(default)]
    pub watch_paths: Vec<PathBuf>,

    /// Shell-style glob excludes applied to absolute paths.
    #[serde(default)]
    pub excludes: Vec<String>,

    /// Extra excludes applied only when capturing events.
    #[serde(default)]
    pub watch_excludes: Vec<String>,

    /// How often accepted events are flushed into a queue entry.
    #[serde(default = "default_origin_poll_interval")]
    pub poll_interval: String,

    /// Delete queue entries older than this (e.g. "7d"). Disabled if unset.
    #[serde(default)]
    pub retention: Option<String>,
}

fn default_origin_poll_interval() -> String {
    "5s".to_string()
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            watch_paths: Vec::new(),
            excludes: Vec::new(),
            watch_excludes: Vec::new(),
            poll_interval: default_origin_poll_interval(),
            retention: None,
        }
    }
}

impl OriginConfig {
    /// Poll interval as a Duration, clamped to [`MIN_POLL_INTERVAL`].
    pub fn poll_interval_duration(&self) -> Duration {
        clamp_poll(humantime::parse_duration(&self.poll_interval).unwrap_or(MIN_POLL_INTERVAL))
    }

    /// Retention window, if queue compaction is enabled.
    pub fn retention_duration(&self) -> Option<Duration> {
        self.retention
            .as_deref()
            .and_then(|r| humantime::parse_duration(r).ok())
            .filter(|d| !d.is_zero())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PathsConfig: this process's working directories
// ═══════════════════════════════════════════════════════════════════════════════

/// Working directories. Both are implicitly excluded from replication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Cursor, checkpoint, secret and pid files live here.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Queue entries: written by the origin, mirrored by followers.
    #[serde(default = "default_queue_dir")]
    pub queue_dir: PathBuf,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./var")
}

fn default_queue_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            queue_dir: default_queue_dir(),
        }
    }
}

impl PathsConfig {
    /// Follower version cursor file.
    pub fn cursor_file(&self) -> PathBuf {
        self.state_dir.join(".last_run")
    }

    /// Origin checkpoint timestamp file.
    pub fn checkpoint_file(&self) -> PathBuf {
        self.state_dir.join(".version")
    }

    /// Secret file generated from `transfer.password`.
    pub fn generated_secret_file(&self) -> PathBuf {
        self.state_dir.join(".rsync.secret")
    }

    /// Pid file for a role.
    pub fn pid_file(&self, role: Role) -> PathBuf {
        self.state_dir.join(format!("tree-replicator-{}.pid", role))
    }

    /// Both working directories, for the implicit excludes.
    pub fn working_dirs(&self) -> Vec<PathBuf> {
        vec![self.state_dir.clone(), self.queue_dir.clone()]
    }

    /// Create both directories if missing.
    pub fn create_dirs(&self) -> Result<()> {
        for dir in [&self.state_dir, &self.queue_dir] {
            std::fs::create_dir_all(dir)
                .map_err(|e| ReplicationError::io("create working dir", dir, e))?;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FollowerConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Follower-side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowerConfig {
    /// Host serving the origin's transfer modules.
    pub origin_host: String,

    /// Local root the origin tree is replicated into.
    #[serde(default = "default_replica_root")]
    pub replica_root: PathBuf,

    /// Sleep between reconcile cycles.
    #[serde(default = "default_follower_poll_interval")]
    pub poll_interval: String,

    /// Run a full reconciliation before the first cycle.
    #[serde(default)]
    pub initial_full_sync: bool,

    /// Run a full reconciliation this often. Unset or zero disables it.
    #[serde(default)]
    pub full_sync_interval: Option<String>,

    /// Compute cycles without deleting, launching actions or moving the cursor.
    #[serde(default)]
    pub dry_run: bool,

    /// Rewritten with the committed version after each cycle.
    #[serde(default)]
    pub end_sync_file: Option<PathBuf>,

    /// Follower-local additions to the origin's excludes.
    #[serde(default)]
    pub excludes: Vec<String>,

    pub transfer: TransferConfig,

    #[serde(default)]
    pub actions: Vec<ActionRule>,
}

fn default_replica_root() -> PathBuf {
    PathBuf::from("/")
}

fn default_follower_poll_interval() -> String {
    "5s".to_string()
}

impl FollowerConfig {
    /// Poll interval as a Duration, clamped to [`MIN_POLL_INTERVAL`].
    pub fn poll_interval_duration(&self) -> Duration {
        clamp_poll(humantime::parse_duration(&self.poll_interval).unwrap_or(MIN_POLL_INTERVAL))
    }

    /// Periodic full reconciliation interval, if enabled.
    pub fn full_sync_interval_duration(&self) -> Option<Duration> {
        self.full_sync_interval
            .as_deref()
            .and_then(|i| humantime::parse_duration(i).ok())
            .filter(|d| !d.is_zero())
    }

    /// Create a follower config for testing.
    pub fn for_testing(replica_root: PathBuf) -> Self {
        Self {
            origin_host: "origin.test".to_string(),
            replica_root,
            poll_interval: default_follower_poll_interval(),
            initial_full_sync: false,
            full_sync_interval: None,
            dry_run: false,
            end_sync_file: None,
            excludes: Vec::new(),
            transfer: TransferConfig::for_testing(),
            actions: Vec::new(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TransferConfig: rsync-compatible transfer tool
// ═══════════════════════════════════════════════════════════════════════════════

/// Transfer tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Executable to run.
    #[serde(default = "default_transfer_command")]
    pub command: String,

    /// Daemon-protocol user.
    pub user: String,

    /// Written to a 0600 secret file at startup.
    #[serde(default)]
    pub password: Option<String>,

    /// Existing secret file; ignored when `password` is set.
    #[serde(default)]
    pub secret_file: Option<PathBuf>,

    /// Module exposing the origin's queue directory.
    #[serde(default = "default_updates_module")]
    pub updates_module: String,

    /// Module exposing the origin's filesystem root.
    #[serde(default = "default_root_module")]
    pub root_module: String,

    /// Options passed before excludes on every invocation.
    #[serde(default = "default_transfer_options")]
    pub options: Vec<String>,

    /// Exit statuses meaning "some listed source files vanished".
    #[serde(default = "default_vanished_exit_codes")]
    pub vanished_exit_codes: Vec<i32>,
}

fn default_transfer_command() -> String {
    "rsync".to_string()
}

fn default_updates_module() -> String {
    "updates".to_string()
}

fn default_root_module() -> String {
    "root".to_string()
}

fn default_transfer_options() -> Vec<String> {
    ["-av", "-r", "--delete", "--timeout=20", "--force", "--ignore-errors"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_vanished_exit_codes() -> Vec<i32> {
    vec![23]
}

impl TransferConfig {
    /// Create a transfer config for testing.
    pub fn for_testing() -> Self {
        Self {
            command: default_transfer_command(),
            user: "replicator".to_string(),
            password: Some("secret".to_string()),
            secret_file: None,
            updates_module: default_updates_module(),
            root_module: default_root_module(),
            options: default_transfer_options(),
            vanished_exit_codes: default_vanished_exit_codes(),
        }
    }
}

/// Post-sync hook: run `command` when a synced path matches `pattern`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRule {
    pub pattern: String,
    pub command: String,
}

impl ActionRule {
    pub fn new(pattern: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            command: command.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════════

fn clamp_poll(d: Duration) -> Duration {
    d.max(MIN_POLL_INTERVAL)
}

fn parse_duration_setting(name: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| ReplicationError::Config(format!("{} = '{}': {}", name, value, e)))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| ReplicationError::io("resolve absolute path", path, e))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
