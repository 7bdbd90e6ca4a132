//! export CLI command: one stored series as a JSON document.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Args;
use std::path::{Path, PathBuf};

use chokepoint_core::SeriesKey;
use chokepoint_data::{export_document, load_series, ExportFormat};

use crate::app::{load_registry, open_store, ConfigArgs};

/// Arguments for the export command.
#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Chokepoint identifier (e.g. "suez-canal")
    #[arg(long)]
    pub chokepoint: String,

    /// State variable name (e.g. "vessel_arrivals")
    #[arg(long)]
    pub variable: String,

    /// Document layout: records or timeseries
    #[arg(long, default_value = "records")]
    pub format: ExportFormat,

    /// Write to this file instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,
}

/// Exports every stored observation of one series.
///
/// # Errors
/// Returns an error for an unknown series, an unreadable store, or a failed
/// write.
pub fn run_export(args: ExportArgs) -> Result<()> {
    let config = args.config.load()?;
    let registry = load_registry(&config)?;
    let key = SeriesKey::new(args.chokepoint, args.variable);
    if registry.get(&key).is_none() {
        bail!("unknown series {key}");
    }

    let store = open_store(&config)?;
    let observations =
        load_series(store.as_ref(), &key).with_context(|| format!("failed to read {key}"))?;
    let doc = export_document(&key, &observations, args.format, Utc::now());
    let body = serde_json::to_string_pretty(&doc)?;

    match args.out {
        Some(path) => {
            write_export(&path, &body)?;
            println!(
                "Exported {} record(s) of {key} to {}",
                observations.len(),
                path.display()
            );
        }
        None => println!("{body}"),
    }
    Ok(())
}

fn write_export(path: &Path, body: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
}
