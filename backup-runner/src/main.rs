//! Backup Runner - Main entry point
//!
//! Parallel rsync backup from a remote host with concurrent bandwidth
//! monitoring.

use anyhow::{bail, Result};
use backup_runner::{
    config::Config,
    daemon::{SessionContext, ShutdownCoordinator},
    orchestrator::BackupOrchestrator,
    ssh::SshSession,
    utils,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Backup type label
    #[arg(short = 't', long, default_value = "full", value_parser = ["quick", "full", "longterm"])]
    backup_type: String,

    /// Disable remote bandwidth monitoring for this run
    #[arg(long)]
    no_monitor: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)?;

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting backup-runner v{} ({} backup)",
        env!("CARGO_PKG_VERSION"),
        args.backup_type
    );

    let session_ctx = SessionContext::detect();
    if let Some(sty) = &session_ctx.screen_session {
        tracing::info!("Running in screen session: {} (detach: Ctrl+A, D)", sty);
    }

    // Preflight: fail before any transfer work starts
    let ssh = SshSession::new(&config);
    let (ok, message) = ssh.test_connection(Duration::from_secs(15)).await;
    if !ok {
        bail!("SSH preflight failed: {}", message);
    }
    let (ok, message) = ssh.check_remote_path(&config.paths.remote_root).await;
    if !ok {
        bail!("Remote root check failed: {}", message);
    }
    tracing::info!("Preflight passed: {}", message);

    let coordinator = ShutdownCoordinator::new();
    coordinator.spawn_signal_listener();

    let orchestrator = BackupOrchestrator::new(Arc::new(config), coordinator.token());
    let report = orchestrator
        .run(&args.backup_type, !args.no_monitor)
        .await?;

    if !report.success {
        std::process::exit(1);
    }
    Ok(())
}
