//! check CLI command.
//!
//! Runs gap detection over every series and prints what a backfill pass
//! would do. Nothing is fetched and nothing is written.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;

use chokepoint_scheduler::{BackfillGap, GapSummary};

use crate::app::{build_dispatcher, ConfigArgs};

/// Gaps listed one by one up to this count; longer lists show first and last.
const MAX_LISTED_GAPS: usize = 5;

/// Arguments for the check command.
#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Print the summaries as JSON
    #[arg(long)]
    pub json: bool,
}

/// Runs the check command.
///
/// # Errors
/// Returns an error if configuration is invalid or the store cannot be read.
pub fn run_check(args: CheckArgs) -> Result<()> {
    let config = args.config.load()?;
    let dispatcher = build_dispatcher(&config)?;

    let summaries = dispatcher
        .check(Utc::now())
        .context("failed to scan series for gaps")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        print_check_report(&summaries);
    }
    Ok(())
}

fn format_slot(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M").to_string()
}

fn describe_gap(gap: &BackfillGap) -> String {
    if gap.start == gap.end {
        format!("{} (1 slot)", format_slot(gap.start))
    } else {
        format!(
            "{} .. {} ({} slots)",
            format_slot(gap.start),
            format_slot(gap.end),
            gap.slots
        )
    }
}

fn describe_gaps(gaps: &[BackfillGap]) -> Vec<String> {
    match gaps {
        [] => Vec::new(),
        [first, .., last] if gaps.len() > MAX_LISTED_GAPS => vec![
            format!("first: {}", describe_gap(first)),
            format!("last:  {}", describe_gap(last)),
            format!("({} gaps in total)", gaps.len()),
        ],
        _ => gaps.iter().map(describe_gap).collect(),
    }
}

fn print_check_report(summaries: &[GapSummary]) {
    println!();
    println!("{}", "=".repeat(90));
    println!("GAP CHECK");
    println!("{}", "=".repeat(90));
    println!(
        "{:<45} {:>10} {:>10} {:>10} {:>10}",
        "Series", "Frequency", "Expected", "Missing", "Unresolved"
    );
    println!("{}", "-".repeat(90));

    let mut total_missing = 0;
    for summary in summaries {
        total_missing += summary.missing_slots;
        println!(
            "{:<45} {:>10} {:>10} {:>10} {:>10}",
            summary.key.to_string(),
            summary.frequency.to_string(),
            summary.expected_slots,
            summary.missing_slots,
            summary.unresolved.len()
        );
        for line in describe_gaps(&summary.gaps) {
            println!("    {line}");
        }
        if summary.truncated {
            println!("    (scan truncated, oldest slots not checked)");
        }
    }

    println!("{}", "=".repeat(90));
    println!(
        "{} series, {} missing slots",
        summaries.len(),
        total_missing
    );
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chokepoint_core::SeriesKey;
    use chrono::{Duration, TimeZone};

    fn gap(day: u32, slots: usize) -> BackfillGap {
        let start = Utc.with_ymd_and_hms(2026, 3, day, 0, 0, 0).unwrap();
        BackfillGap {
            key: SeriesKey::new("suez-canal", "vessel_arrivals"),
            start,
            end: start + Duration::days(slots as i64 - 1),
            slots,
        }
    }

    #[test]
    fn test_short_gap_lists_are_listed_individually() {
        let gaps: Vec<_> = (1..=5).map(|d| gap(d * 2, 1)).collect();
        let lines = describe_gaps(&gaps);
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "2026-03-02 00:00 (1 slot)");
    }

    #[test]
    fn test_long_gap_lists_show_first_and_last() {
        let gaps: Vec<_> = (1..=6).map(|d| gap(d * 3, 2)).collect();
        let lines = describe_gaps(&gaps);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "first: 2026-03-03 00:00 .. 2026-03-04 00:00 (2 slots)");
        assert_eq!(lines[1], "last:  2026-03-18 00:00 .. 2026-03-19 00:00 (2 slots)");
        assert_eq!(lines[2], "(6 gaps in total)");
    }

    #[test]
    fn test_no_gaps_prints_nothing() {
        assert!(describe_gaps(&[]).is_empty());
    }
}
