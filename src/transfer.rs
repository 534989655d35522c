// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The transfer primitive.
//!
//! Actual byte movement is delegated to an external, rsync-compatible tool.
//! The engine only needs three things from it:
//!
//! 1. a files-list mode (`--files-from`),
//! 2. one machine-parsable line per transferred file (`file:<relative-path>`),
//! 3. a stable exit status meaning "some listed source files vanished",
//!    distinct from every other failure.
//!
//! [`Transfer`] is the seam: [`RsyncTransfer`] drives the real tool, tests
//! plug in filesystem-backed doubles.
//!
//! # Example
//!
//! ```rust,no_run
//! use tree_replication_engine::transfer::{BoxFuture, Transfer, TransferOutput, TransferRequest};
//!
//! struct AlwaysClean;
//!
//! impl Transfer for AlwaysClean {
//!     fn run(&self, _request: TransferRequest) -> BoxFuture<'_, TransferOutput> {
//!         Box::pin(async { Ok(TransferOutput::clean("file:srv/www/index.html\n")) })
//!     }
//! }
//! ```

use crate::config::{PathsConfig, TransferConfig};
use crate::error::{ReplicationError, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use tracing::debug;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Per-file output line prefix requested from the tool.
pub const FILE_LINE_PREFIX: &str = "file:";

/// Where a transfer reads from, on the origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferSource {
    /// The origin's queue directory.
    Updates,
    /// An absolute path on the origin (`/` for files-from transfers).
    Tree(PathBuf),
}

/// One invocation of the transfer primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub source: TransferSource,
    /// Local directory the source is mirrored into.
    pub destination: PathBuf,
    /// Exclude patterns, already relative to the source root.
    pub excludes: Vec<String>,
    /// Restrict the transfer to the paths listed in this file.
    pub files_from: Option<PathBuf>,
}

/// What the tool reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl TransferOutput {
    pub fn clean(stdout: impl Into<String>) -> Self {
        Self {
            exit_status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_status: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Relative paths of transferred files (directories skipped).
    pub fn produced_files(&self) -> Vec<String> {
        parse_file_lines(&self.stdout)
    }
}

/// Classification of a finished transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Exit status 0.
    Clean,
    /// Allow-listed status: some listed source files vanished.
    PartialVanished,
    /// Any other non-zero status.
    Failed(i32),
}

impl TransferOutcome {
    pub fn classify(exit_status: i32, vanished_exit_codes: &[i32]) -> Self {
        if exit_status == 0 {
            TransferOutcome::Clean
        } else if vanished_exit_codes.contains(&exit_status) {
            TransferOutcome::PartialVanished
        } else {
            TransferOutcome::Failed(exit_status)
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferOutcome::Clean => "clean",
            TransferOutcome::PartialVanished => "partial_vanished",
            TransferOutcome::Failed(_) => "failed",
        }
    }
}

/// Extract `file:` lines from tool output.
///
/// Directory lines (trailing `/`) are skipped and a symlink suffix
/// (`name -> target`) is stripped.
pub fn parse_file_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| line.strip_prefix(FILE_LINE_PREFIX))
        .map(|rest| match rest.split_once(" -> ") {
            Some((name, _target)) => name,
            None => rest,
        })
        .filter(|rest| !rest.is_empty() && !rest.ends_with('/'))
        .map(|rest| rest.to_string())
        .collect()
}

/// Join a reported relative path onto the absolute root it was transferred under.
pub fn absolutize(root: &Path, relative: &str) -> PathBuf {
    root.join(relative.trim_start_matches('/'))
}

/// Trait defining the transfer primitive.
///
/// Implementations block (from the caller's perspective) until the transfer
/// exits. A non-zero exit is reported through [`TransferOutput::exit_status`];
/// `Err` is reserved for failing to run the tool at all.
pub trait Transfer: Send + Sync + 'static {
    fn run(&self, request: TransferRequest) -> BoxFuture<'_, TransferOutput>;
}

/// Transfer via an rsync-compatible daemon-protocol client.
#[derive(Debug, Clone)]
pub struct RsyncTransfer {
    config: TransferConfig,
    origin_host: String,
    secret_file: PathBuf,
    dry_run: bool,
}

impl RsyncTransfer {
    pub fn new(
        config: TransferConfig,
        origin_host: impl Into<String>,
        secret_file: impl Into<PathBuf>,
        dry_run: bool,
    ) -> Self {
        Self {
            config,
            origin_host: origin_host.into(),
            secret_file: secret_file.into(),
            dry_run,
        }
    }

    pub fn vanished_exit_codes(&self) -> &[i32] {
        &self.config.vanished_exit_codes
    }

    fn source_url(&self, source: &TransferSource) -> String {
        let prefix = format!("{}@{}::", self.config.user, self.origin_host);
        match source {
            TransferSource::Updates => format!("{}{}/", prefix, self.config.updates_module),
            TransferSource::Tree(path) => {
                let path = path.to_string_lossy();
                let path = path.trim_end_matches('/');
                format!("{}{}{}/", prefix, self.config.root_module, path)
            }
        }
    }

    /// Full argument vector (without the program name).
    pub fn build_args(&self, request: &TransferRequest) -> Vec<String> {
        let mut args = self.config.options.clone();
        // the queue fetch only mirrors into our own working dir
        let replica_write = request.source != TransferSource::Updates;
        if self.dry_run && replica_write && !args.iter().any(|a| a == "--dry-run" || a == "-n") {
            args.push("--dry-run".to_string());
        }
        args.extend(request.excludes.iter().map(|e| format!("--exclude={}", e)));
        args.push("--out-format".to_string());
        args.push(format!("{}%n%L", FILE_LINE_PREFIX));
        if let Some(files_from) = &request.files_from {
            args.push(format!("--files-from={}", files_from.display()));
        }
        args.push("--password-file".to_string());
        args.push(self.secret_file.to_string_lossy().into_owned());
        args.push(self.source_url(&request.source));

        let mut destination = request.destination.to_string_lossy().into_owned();
        if !destination.ends_with('/') {
            destination.push('/');
        }
        args.push(destination);
        args
    }
}

impl Transfer for RsyncTransfer {
    fn run(&self, request: TransferRequest) -> BoxFuture<'_, TransferOutput> {
        Box::pin(async move {
            let args = self.build_args(&request);
            debug!(command = %self.config.command, args = %args.join(" "), "Running transfer");

            let output = tokio::process::Command::new(&self.config.command)
                .args(&args)
                .stdin(Stdio::null())
                .output()
                .await
                .map_err(|e| ReplicationError::transfer(format!("failed to run {}", self.config.command), e))?;

            Ok(TransferOutput {
                // killed by a signal: no code, never the vanished status
                exit_status: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}

/// Resolve the secret file the tool reads its password from.
///
/// A configured `password` is written to the state dir with mode 0600;
/// otherwise the configured `secret_file` is used as is.
pub fn prepare_secret_file(paths: &PathsConfig, config: &TransferConfig) -> Result<PathBuf> {
    if let Some(password) = &config.password {
        let path = paths.generated_secret_file();
        write_private_file(&path, password)?;
        return Ok(path);
    }
    config
        .secret_file
        .clone()
        .ok_or_else(|| ReplicationError::Config("No transfer secret configured".to_string()))
}

#[cfg(unix)]
fn write_private_file(path: &Path, contents: &str) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| ReplicationError::io("write secret file", path, e))?;
    file.write_all(contents.as_bytes())
        .map_err(|e| ReplicationError::io("write secret file", path, e))?;
    // mode() only applies on creation
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| ReplicationError::io("chmod secret file", path, e))
}

#[cfg(not(unix))]
fn write_private_file(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).map_err(|e| ReplicationError::io("write secret file", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn rsync(dry_run: bool) -> RsyncTransfer {
        RsyncTransfer::new(
            TransferConfig::for_testing(),
            "front1",
            "/opt/sync/var/.rsync.secret",
            dry_run,
        )
    }

    #[test]
    fn test_classify() {
        let vanished = [23];
        assert_eq!(TransferOutcome::classify(0, &vanished), TransferOutcome::Clean);
        assert_eq!(TransferOutcome::classify(23, &vanished), TransferOutcome::PartialVanished);
        assert_eq!(TransferOutcome::classify(24, &vanished), TransferOutcome::Failed(24));
        assert_eq!(TransferOutcome::classify(-1, &vanished), TransferOutcome::Failed(-1));
        assert_eq!(TransferOutcome::classify(23, &[]), TransferOutcome::Failed(23));
    }

    #[test]
    fn test_parse_file_lines() {
        let stdout = "receiving incremental file list\n\
                      file:srv/www/\n\
                      file:srv/www/index.html\n\
                      file:srv/www/link -> index.html\n\
                      file:\n\
                      sent 100 bytes  received 2000 bytes\n";
        assert_eq!(
            parse_file_lines(stdout),
            vec!["srv/www/index.html".to_string(), "srv/www/link".to_string()]
        );
    }

    #[test]
    fn test_absolutize() {
        assert_eq!(absolutize(Path::new("/"), "srv/a.txt"), PathBuf::from("/srv/a.txt"));
        assert_eq!(
            absolutize(Path::new("/srv/www"), "img/a.png"),
            PathBuf::from("/srv/www/img/a.png")
        );
    }

    #[test]
    fn test_build_args_files_from() {
        let request = TransferRequest {
            source: TransferSource::Tree(PathBuf::from("/")),
            destination: PathBuf::from("/"),
            excludes: vec!["*.tmp".to_string(), "srv/www/cache/*".to_string()],
            files_from: Some(PathBuf::from("/opt/sync/data/100.incremental")),
        };
        let args = rsync(false).build_args(&request);

        assert_eq!(&args[..6], &["-av", "-r", "--delete", "--timeout=20", "--force", "--ignore-errors"]);
        assert!(args.contains(&"--exclude=*.tmp".to_string()));
        assert!(args.contains(&"--exclude=srv/www/cache/*".to_string()));
        assert!(args.contains(&"--files-from=/opt/sync/data/100.incremental".to_string()));
        assert!(args.contains(&"file:%n%L".to_string()));
        assert!(!args.contains(&"--dry-run".to_string()));
        assert_eq!(args[args.len() - 2], "replicator@front1::root/");
        assert_eq!(args[args.len() - 1], "/");
    }

    #[test]
    fn test_build_args_tree_and_updates_sources() {
        let transfer = rsync(true);
        let tree = TransferRequest {
            source: TransferSource::Tree(PathBuf::from("/srv/www")),
            destination: PathBuf::from("/srv/www"),
            excludes: vec![],
            files_from: None,
        };
        let args = transfer.build_args(&tree);
        assert!(args.contains(&"--dry-run".to_string()));
        assert_eq!(args[args.len() - 2], "replicator@front1::root/srv/www/");
        assert_eq!(args[args.len() - 1], "/srv/www/");
        assert!(!args.iter().any(|a| a.starts_with("--files-from")));

        let updates = TransferRequest {
            source: TransferSource::Updates,
            destination: PathBuf::from("/opt/sync/data"),
            excludes: vec![],
            files_from: None,
        };
        let args = transfer.build_args(&updates);
        assert!(!args.contains(&"--dry-run".to_string()));
        assert_eq!(args[args.len() - 2], "replicator@front1::updates/");
        assert_eq!(args[args.len() - 1], "/opt/sync/data/");
    }

    #[tokio::test]
    async fn test_missing_binary_is_transfer_error() {
        let mut config = TransferConfig::for_testing();
        config.command = "/nonexistent/definitely-not-rsync".to_string();
        let transfer = RsyncTransfer::new(config, "front1", "/tmp/secret", false);
        let err = transfer
            .run(TransferRequest {
                source: TransferSource::Updates,
                destination: PathBuf::from("/tmp"),
                excludes: vec![],
                files_from: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicationError::Transfer { .. }));
        assert!(err.is_retryable());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_is_reported() {
        let mut config = TransferConfig::for_testing();
        config.command = "false".to_string();
        config.options = vec![];
        let transfer = RsyncTransfer::new(config, "front1", "/tmp/secret", false);
        let output = transfer
            .run(TransferRequest {
                source: TransferSource::Updates,
                destination: PathBuf::from("/tmp"),
                excludes: vec![],
                files_from: None,
            })
            .await
            .unwrap();
        assert_eq!(output.exit_status, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_prepare_secret_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let paths = PathsConfig {
            state_dir: dir.path().to_path_buf(),
            queue_dir: dir.path().join("data"),
        };
        let path = prepare_secret_file(&paths, &TransferConfig::for_testing()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "secret");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_prepare_secret_file_explicit() {
        let dir = tempdir().unwrap();
        let paths = PathsConfig {
            state_dir: dir.path().to_path_buf(),
            queue_dir: dir.path().join("data"),
        };
        let mut config = TransferConfig::for_testing();
        config.password = None;
        config.secret_file = Some(PathBuf::from("/etc/rsync.secret"));
        assert_eq!(
            prepare_secret_file(&paths, &config).unwrap(),
            PathBuf::from("/etc/rsync.secret")
        );
    }
}
