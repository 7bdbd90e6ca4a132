//! backfill CLI command: one full pass over every series.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;

use crate::app::{build_dispatcher, ConfigArgs};

/// Arguments for the backfill command.
#[derive(Args, Debug, Clone)]
pub struct BackfillArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Scans every series and refills missing slots, unresolved ones included.
///
/// # Errors
/// Returns an error if configuration is invalid or the store fails.
pub async fn run_backfill(args: BackfillArgs) -> Result<()> {
    let config = args.config.load()?;
    let dispatcher = build_dispatcher(&config)?;

    let report = dispatcher
        .full_backfill_pass(Utc::now())
        .await
        .context("backfill pass failed")?;

    println!();
    println!("BACKFILL PASS");
    println!("{}", "-".repeat(40));
    println!("  {:<20} {:>8}", "Gaps", report.gaps);
    println!("  {:<20} {:>8}", "Slots filled", report.filled);
    println!("  {:<20} {:>8}", "Already present", report.skipped_present);
    println!("  {:<20} {:>8}", "Fetches", report.fetches);
    println!("  {:<20} {:>8}", "Unresolved", report.unresolved);
    println!("  {:<20} {:>8}", "Skipped (busy)", report.skipped_busy);
    println!();
    Ok(())
}
