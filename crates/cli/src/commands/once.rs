//! once CLI command: one tick across every series.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;

use chokepoint_scheduler::TickReport;

use crate::app::{build_dispatcher, ConfigArgs};

/// Arguments for the once command.
#[derive(Args, Debug, Clone)]
pub struct OnceArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Also run a full backfill pass after collecting
    #[arg(long)]
    pub backfill: bool,
}

/// Collects every registered series now, regardless of cadence.
///
/// # Errors
/// Returns an error if configuration is invalid or an append failed.
pub async fn run_once(args: OnceArgs) -> Result<()> {
    let config = args.config.load()?;
    let dispatcher = build_dispatcher(&config)?;

    let now = Utc::now();
    let mut report = dispatcher
        .run_once(now)
        .await
        .context("collection run failed")?;
    if args.backfill {
        let backfill = dispatcher
            .full_backfill_pass(now)
            .await
            .context("backfill pass failed")?;
        report.backfill.merge(&backfill);
    }

    print_tick_report(&report);
    Ok(())
}

fn print_tick_report(report: &TickReport) {
    println!();
    println!("{}", "=".repeat(60));
    println!("COLLECTION RUN");
    println!("{}", "=".repeat(60));
    println!("  {:<20} {:>8}", "Due", report.due);
    println!("  {:<20} {:>8}", "Started", report.started);
    println!("  {:<20} {:>8}", "Skipped (busy)", report.skipped_busy);
    println!("  {:<20} {:>8}", "Succeeded", report.succeeded);
    println!("  {:<20} {:>8}", "Failed", report.failed);
    println!("  {:<20} {:>8}", "Appended", report.appended);
    println!("  {:<20} {:>8}", "Signals", report.signals);
    if report.backfill.gaps > 0 {
        println!("{}", "-".repeat(60));
        println!(
            "  Backfill: {} gaps, {} slots filled, {} fetches, {} unresolved",
            report.backfill.gaps,
            report.backfill.filled,
            report.backfill.fetches,
            report.backfill.unresolved
        );
    }
    println!("{}", "=".repeat(60));
    println!();
}
