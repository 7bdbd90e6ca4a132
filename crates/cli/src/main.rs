use clap::{Parser, Subcommand};

mod app;
mod commands;

use commands::{
    BackfillArgs, CheckArgs, CollectArgs, ExportArgs, OnceArgs, StartArgs, StatusArgs,
};

#[derive(Parser)]
#[command(name = "chokepoint")]
#[command(about = "Scheduled collection and signal detection for maritime chokepoints", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect every series once, right now
    Once(OnceArgs),
    /// Run the tick loop until Ctrl+C
    Start(StartArgs),
    /// Report missing slots and unresolved gaps without fetching
    Check(CheckArgs),
    /// Run one full backfill pass
    Backfill(BackfillArgs),
    /// Collect a single series through the full pipeline
    Collect(CollectArgs),
    /// Show observation counts and date ranges per series
    Status(StatusArgs),
    /// Export one series as JSON
    Export(ExportArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Once(args) => {
            commands::run_once(args).await?;
        }
        Commands::Start(args) => {
            commands::run_start(args).await?;
        }
        Commands::Check(args) => {
            commands::run_check(args)?;
        }
        Commands::Backfill(args) => {
            commands::run_backfill(args).await?;
        }
        Commands::Collect(args) => {
            commands::run_collect(args).await?;
        }
        Commands::Status(args) => {
            commands::run_status(args)?;
        }
        Commands::Export(args) => {
            commands::run_export(args)?;
        }
    }

    Ok(())
}
