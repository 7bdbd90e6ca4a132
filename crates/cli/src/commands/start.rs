//! start CLI command: the persistent tick loop.
//!
//! Runs until Ctrl+C. Running jobs finish before the command returns.

use anyhow::{Context, Result};
use clap::Args;
use tokio::sync::mpsc;
use tracing::{info, warn};

use chokepoint_scheduler::DispatcherCommand;

use crate::app::{build_dispatcher, ConfigArgs};

/// Arguments for the start command.
#[derive(Args, Debug, Clone)]
pub struct StartArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Collect every series once at startup
    #[arg(long)]
    pub run_now: bool,

    /// Skip the full backfill pass at startup
    #[arg(long)]
    pub no_initial_backfill: bool,
}

/// Runs the dispatcher loop until interrupted.
///
/// # Errors
/// Returns an error if configuration is invalid or the dispatcher stops on a
/// storage failure.
pub async fn run_start(args: StartArgs) -> Result<()> {
    let config = args.config.load()?;
    let dispatcher = build_dispatcher(&config)?;

    let (tx, rx) = mpsc::channel(16);
    let shutdown = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, finishing running jobs");
            if shutdown.send(DispatcherCommand::Shutdown).await.is_err() {
                warn!("Dispatcher already stopped");
            }
        }
    });

    if args.run_now {
        tx.send(DispatcherCommand::RunNow)
            .await
            .context("dispatcher command channel closed")?;
    }
    if !args.no_initial_backfill {
        tx.send(DispatcherCommand::FullBackfill)
            .await
            .context("dispatcher command channel closed")?;
    }

    info!(
        tick_secs = config.dispatcher.tick_secs,
        full_scan_interval_secs = config.backfill.full_scan_interval_secs,
        "Starting dispatcher"
    );
    dispatcher.run(rx).await.context("dispatcher stopped")?;
    info!("Dispatcher stopped");
    Ok(())
}
