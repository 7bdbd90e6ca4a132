//! Observation storage for chokepoint monitoring.
//!
//! This crate provides:
//! - An in-memory SeriesStore for tests and single-pass runs
//! - A CSV-backed SeriesStore, one file per series
//! - Persistence for unresolved backfill gaps
//! - JSON export and summary statistics per series

pub mod csv_storage;
pub mod export;
pub mod memory;
pub mod unresolved;

pub use csv_storage::CsvSeriesStore;
pub use export::{export_document, load_series, ExportFormat, SeriesStats};
pub use memory::InMemorySeriesStore;
pub use unresolved::{UnresolvedGap, UnresolvedGapStore};
