//! Auto Backup Agent - Main entry point
//!
//! Mirrors a working tree and keeps it repaired from the backup copy.

use anyhow::{Context, Result};
use autobackup_agent::{
    config::Config, daemon::shutdown::ShutdownCoordinator, utils, Lifecycle, MirrorError,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Tree to mirror (overrides config)
    #[arg(short, long, value_name = "DIR")]
    source: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up the tree, start reconciliation and stay in the foreground
    Enable,
    /// Persist the disabled state (a running agent stops within one poll)
    Disable,
    /// Resume reconciliation if auto backup is enabled
    Run,
    /// Run a single backup pass without starting reconciliation
    Backup,
    /// Show the persisted state and manifest summary
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        Config::default()
    };
    if let Some(source) = args.source {
        config.mirror.source_root = source;
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!("Starting autobackup v{}", env!("CARGO_PKG_VERSION"));

    // Signals cancel the lifecycle token: an in-flight pass aborts and the
    // supervisor stops the daemons.
    let shutdown_coordinator = ShutdownCoordinator::new();
    let mut lifecycle = Lifecycle::with_shutdown(config, shutdown_coordinator.token());
    tokio::spawn(async move {
        shutdown_coordinator.wait_for_signal().await;
    });

    match args.command {
        Command::Enable => {
            let report = match lifecycle.enable().await {
                Ok(report) => report,
                Err(MirrorError::Cancelled) => {
                    tracing::warn!("Interrupted before the backup pass finished");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            tracing::info!(
                "Tracking {} files ({} failed to copy)",
                report.manifest.len(),
                report.failed
            );
            supervise(&mut lifecycle).await?;
        }
        Command::Disable => {
            lifecycle.disable().await?;
        }
        Command::Run => {
            if lifecycle.resume().await? {
                supervise(&mut lifecycle).await?;
            }
        }
        Command::Backup => {
            let (target, report) = match lifecycle.run_backup().await {
                Ok(done) => done,
                Err(MirrorError::Cancelled) => {
                    tracing::warn!("Backup pass interrupted, manifest not written");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            tracing::info!(
                "Backup completed. Successful: {}, Failed: {}",
                report.succeeded,
                report.failed
            );
            tracing::info!("Manifest saved to: {}", target.manifest_path().display());
        }
        Command::Status => {
            let status = lifecycle.status()?;
            println!("enabled:       {}", status.enabled);
            println!("running:       {}", status.running);
            match status.backup_root {
                Some(root) => println!("backup root:   {}", root.display()),
                None => println!("backup root:   (none)"),
            }
            println!("tracked files: {}", status.tracked_files);
            println!("daemons:       {}", status.daemons);
        }
    }

    Ok(())
}

/// Run daemons until SIGINT/SIGTERM or until auto backup is disabled.
async fn supervise(lifecycle: &mut Lifecycle) -> Result<()> {
    if let Some(target) = lifecycle.target() {
        tracing::info!("Reconciling against {}", target.backup_root.display());
    }

    lifecycle.supervise().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
