//! status CLI command.
//!
//! Shows observation count and date range for every configured series,
//! and with `--stats` summary statistics for number series.
//! Reads the store only; no dispatcher is built.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;

use chokepoint_core::{SeriesKey, SeriesStore};
use chokepoint_data::{load_series, SeriesStats};

use crate::app::{load_registry, open_store, ConfigArgs};

/// Arguments for the status command.
#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Only show series of this chokepoint
    #[arg(long)]
    pub chokepoint: Option<String>,

    /// Add count, total, mean, min, max, and deviation for number series
    #[arg(long)]
    pub stats: bool,
}

/// Data bounds for a single series.
#[derive(Debug)]
struct SeriesStatus {
    key: SeriesKey,
    frequency: String,
    count: usize,
    earliest: Option<DateTime<Utc>>,
    latest: Option<DateTime<Utc>>,
    stats: Option<SeriesStats>,
}

impl SeriesStatus {
    fn format_date(dt: Option<DateTime<Utc>>) -> String {
        dt.map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "N/A".to_string())
    }
}

fn format_number(n: f64) -> String {
    format!("{n:.2}")
}

fn describe_stats(stats: &SeriesStats) -> String {
    format!(
        "n={} total={} mean={} min={} max={} std={}",
        stats.count,
        format_number(stats.total),
        format_number(stats.mean),
        format_number(stats.min),
        format_number(stats.max),
        stats
            .std_dev
            .map(format_number)
            .unwrap_or_else(|| "N/A".to_string())
    )
}

/// Runs the status command.
///
/// # Errors
/// Returns an error if configuration is invalid or the store cannot be read.
pub fn run_status(args: StatusArgs) -> Result<()> {
    let config = args.config.load()?;
    let registry = load_registry(&config)?;
    let store = open_store(&config)?;

    let mut statuses = Vec::new();
    for (key, series) in registry.iter() {
        if args
            .chokepoint
            .as_deref()
            .is_some_and(|c| c != key.chokepoint)
        {
            continue;
        }
        let stats = if args.stats {
            let observations =
                load_series(store.as_ref(), key).with_context(|| format!("failed to read {key}"))?;
            SeriesStats::from_observations(&observations)
        } else {
            None
        };
        statuses.push(SeriesStatus {
            key: key.clone(),
            frequency: series.schedule.to_string(),
            count: store
                .count(key)
                .with_context(|| format!("failed to count {key}"))?,
            earliest: store.earliest(key)?.map(|o| o.timestamp),
            latest: store.latest(key)?.map(|o| o.timestamp),
            stats,
        });
    }

    print_status_report(&statuses);
    Ok(())
}

fn print_status_report(statuses: &[SeriesStatus]) {
    println!();
    println!("{}", "=".repeat(110));
    println!("SERIES STATUS");
    println!("{}", "=".repeat(110));
    println!(
        "{:<45} {:<16} {:>10} {:>17} {:>17}",
        "Series", "Schedule", "Records", "Earliest", "Latest"
    );
    println!("{}", "-".repeat(110));

    for status in statuses {
        println!(
            "{:<45} {:<16} {:>10} {:>17} {:>17}",
            status.key.to_string(),
            status.frequency,
            status.count,
            SeriesStatus::format_date(status.earliest),
            SeriesStatus::format_date(status.latest)
        );
        if let Some(stats) = &status.stats {
            println!("    {}", describe_stats(stats));
        }
    }

    let empty = statuses.iter().filter(|s| s.count == 0).count();
    println!("{}", "=".repeat(110));
    println!("{} series, {} without data", statuses.len(), empty);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(std_dev: Option<f64>) -> SeriesStats {
        SeriesStats {
            count: 3,
            total: 130.5,
            mean: 43.5,
            min: 40.0,
            max: 48.25,
            std_dev,
        }
    }

    #[test]
    fn test_stats_line_uses_two_decimals() {
        assert_eq!(
            describe_stats(&stats(Some(4.2712))),
            "n=3 total=130.50 mean=43.50 min=40.00 max=48.25 std=4.27"
        );
    }

    #[test]
    fn test_single_value_has_no_deviation() {
        assert!(describe_stats(&stats(None)).ends_with("std=N/A"));
    }

    #[test]
    fn test_missing_dates_show_placeholder() {
        assert_eq!(SeriesStatus::format_date(None), "N/A");
    }
}
