// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tree_replication_engine::{
    daemon, FollowerEngine, OriginEngine, PidFile, ReplicationConfig, ReplicationError, Result,
    Role,
};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "tree-replicator")]
#[command(about = "Replicate a filesystem tree from an origin host to its followers")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "TREE_REPLICATOR_CONFIG", default_value = "/etc/tree-replicator.yaml")]
    config: PathBuf,

    /// Log at debug level (overrides the config file; RUST_LOG wins over both)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the configured roots and write queue entries
    Origin,
    /// Pull queue entries from the origin and apply them
    Follower {
        /// Run a single reconciliation cycle and exit
        #[arg(long)]
        once: bool,
    },
    /// Transfer every watched root once and exit
    FullSync,
}

impl Command {
    fn role(&self) -> Role {
        match self {
            Command::Origin => Role::Origin,
            Command::Follower { .. } | Command::FullSync => Role::Follower,
        }
    }
}

fn init_tracing(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            "debug".into()
        } else {
            "info".into()
        }
    });

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| ReplicationError::io("open log file", path, e))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
    Ok(())
}

async fn run(cli: Cli, config: ReplicationConfig) -> Result<()> {
    let role = cli.command.role();
    config.paths.create_dirs()?;
    let _pid_file = PidFile::acquire(config.paths.pid_file(role))?;

    match cli.command {
        Command::Origin => {
            let mut engine = OriginEngine::from_config(&config)?;
            let shutdown_rx = daemon::shutdown_on_signal()?;
            engine.run(shutdown_rx).await
        }
        Command::Follower { once: true } => {
            let engine = FollowerEngine::from_config(&config)?;
            let report = engine.run_once().await?;
            info!(
                outcome = report.outcome.as_str(),
                cursor_before = report.cursor_before,
                cursor_after = report.cursor_after,
                entries = report.entries.len(),
                "Single cycle finished"
            );
            if report.failed() {
                return Err(ReplicationError::transfer_msg(
                    "cycle had failed transfers, cursor kept",
                ));
            }
            Ok(())
        }
        Command::Follower { once: false } => {
            let engine = FollowerEngine::from_config(&config)?;
            let shutdown_rx = daemon::shutdown_on_signal()?;
            engine.run(shutdown_rx).await
        }
        Command::FullSync => {
            let engine = FollowerEngine::from_config(&config)?;
            let report = engine.run_full_sync().await;
            info!(
                roots = report.roots,
                failures = report.failures,
                synced = report.synced_paths.len(),
                "Full sync finished"
            );
            if report.failures > 0 {
                return Err(ReplicationError::transfer_msg(format!(
                    "{} of {} roots failed to transfer",
                    report.failures, report.roots
                )));
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ReplicationConfig::from_file(&cli.config, cli.command.role()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("tree-replicator: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_tracing(cli.verbose || config.verbose, config.log_file.as_deref()) {
        eprintln!("tree-replicator: {}", e);
        return ExitCode::FAILURE;
    }

    info!(
        role = %cli.command.role(),
        config = %cli.config.display(),
        version = env!("CARGO_PKG_VERSION"),
        "Starting"
    );

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Exiting");
            ExitCode::FAILURE
        }
    }
}
