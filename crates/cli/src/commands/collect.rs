//! collect CLI command: one series through the full pipeline.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Args;

use chokepoint_core::SeriesKey;

use crate::app::{build_dispatcher, ConfigArgs};

/// Arguments for the collect command.
#[derive(Args, Debug, Clone)]
pub struct CollectArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Chokepoint identifier (e.g. "suez-canal")
    #[arg(long)]
    pub chokepoint: String,

    /// State variable name (e.g. "vessel_arrivals")
    #[arg(long)]
    pub variable: String,

    /// Print the stored observations as JSON
    #[arg(long)]
    pub show: bool,
}

/// Fetches, stores, and evaluates one series now.
///
/// # Errors
/// Returns an error for an unknown series, a failed collection cycle, or a
/// storage failure.
pub async fn run_collect(args: CollectArgs) -> Result<()> {
    let config = args.config.load()?;
    let dispatcher = build_dispatcher(&config)?;
    let key = SeriesKey::new(args.chokepoint, args.variable);

    let (report, stored) = dispatcher
        .collect_key(&key, Utc::now())
        .await
        .with_context(|| format!("failed to collect {key}"))?;

    if let Some(failure) = report.failure {
        bail!("collection of {key} failed: {failure}");
    }

    println!(
        "{key}: {} new observation(s), {} signal(s)",
        report.appended,
        report.signals.len()
    );
    if let (Some(first), Some(last)) = (stored.first(), stored.last()) {
        println!(
            "  {} .. {}",
            first.timestamp.format("%Y-%m-%d %H:%M"),
            last.timestamp.format("%Y-%m-%d %H:%M")
        );
    }
    for event in &report.signals {
        println!("  signal {} at {}", event.signal_type, event.timestamp);
    }
    if args.show {
        println!("{}", serde_json::to_string_pretty(&stored)?);
    }
    Ok(())
}
