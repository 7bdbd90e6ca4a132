//! CSV-backed SeriesStore.
//!
//! One append-only file per series at `<root>/<chokepoint>/<variable>.csv`
//! with columns `timestamp,value_type,value`. Rows are written in arrival
//! order; the in-memory index orders them by timestamp, so a backfilled
//! older row never needs a rewrite. A file is read once, on first access.
//!
//! Each series has its own lock, so a disk write only blocks readers and
//! writers of that series.

use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use chokepoint_core::{
    AppendOutcome, Observation, ObservationValue, SeriesKey, SeriesStore, StorageError, ValueType,
};

use crate::memory::check_key;

const HEADER: [&str; 3] = ["timestamp", "value_type", "value"];

type SeriesIndex = BTreeMap<DateTime<Utc>, Observation>;
type SharedSeries = Arc<RwLock<SeriesIndex>>;

pub struct CsvSeriesStore {
    root: PathBuf,
    index: RwLock<HashMap<SeriesKey, SharedSeries>>,
}

impl CsvSeriesStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    /// Returns error if the root directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            index: RwLock::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the CSV file holding `key`.
    #[must_use]
    pub fn series_path(&self, key: &SeriesKey) -> PathBuf {
        self.root
            .join(&key.chokepoint)
            .join(format!("{}.csv", key.variable))
    }

    fn read_series(&self, key: &SeriesKey) -> Result<SeriesIndex, StorageError> {
        let path = self.series_path(key);
        let mut entries = SeriesIndex::new();
        if !path.exists() {
            return Ok(entries);
        }

        let location = path.display().to_string();
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(&path)
            .map_err(|e| StorageError::Csv(e.to_string()))?;

        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| StorageError::Csv(e.to_string()))?;
            let corrupt = |message: String| StorageError::Corrupt {
                location: format!("{location}:{}", line + 2),
                message,
            };
            if record.len() != HEADER.len() {
                return Err(corrupt(format!("expected 3 columns, got {}", record.len())));
            }

            let timestamp = DateTime::parse_from_rfc3339(&record[0])
                .map_err(|e| corrupt(format!("bad timestamp '{}': {e}", &record[0])))?
                .with_timezone(&Utc);
            let value_type: ValueType = record[1]
                .parse()
                .map_err(|e: chokepoint_core::ConfigError| corrupt(e.to_string()))?;
            let value = ObservationValue::from_cell(value_type, &record[2]).map_err(corrupt)?;

            if entries.contains_key(&timestamp) {
                warn!(series = %key, timestamp = %timestamp, "Duplicate row in series file, keeping first");
                continue;
            }
            entries.insert(timestamp, Observation::new(key.clone(), timestamp, value));
        }

        debug!(series = %key, rows = entries.len(), path = %location, "Loaded series file");
        Ok(entries)
    }

    /// The index of `key`, loading its file on first access.
    fn series(&self, key: &SeriesKey) -> Result<SharedSeries, StorageError> {
        if let Some(series) = self.index.read().get(key) {
            return Ok(Arc::clone(series));
        }
        let entries = self.read_series(key)?;
        let mut index = self.index.write();
        let series = index
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(entries)));
        Ok(Arc::clone(series))
    }

    fn with_series<R>(
        &self,
        key: &SeriesKey,
        f: impl FnOnce(&SeriesIndex) -> R,
    ) -> Result<R, StorageError> {
        let series = self.series(key)?;
        let entries = series.read();
        Ok(f(&entries))
    }

    fn write_row(&self, key: &SeriesKey, obs: &Observation) -> Result<(), StorageError> {
        let path = self.series_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let needs_header = !path.exists() || fs::metadata(&path)?.len() == 0;

        let file: File = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if needs_header {
            writer
                .write_record(HEADER)
                .map_err(|e| StorageError::Csv(e.to_string()))?;
        }
        writer
            .write_record([
                obs.timestamp.to_rfc3339(),
                obs.value_type().as_str().to_string(),
                obs.value.to_cell(),
            ])
            .map_err(|e| StorageError::Csv(e.to_string()))?;
        writer.flush()?;
        Ok(())
    }
}

impl SeriesStore for CsvSeriesStore {
    fn append(&self, key: &SeriesKey, obs: &Observation) -> Result<AppendOutcome, StorageError> {
        check_key(key, obs)?;
        let series = self.series(key)?;

        let mut entries = series.write();
        if entries.contains_key(&obs.timestamp) {
            return Ok(AppendOutcome::Duplicate);
        }
        self.write_row(key, obs)?;
        entries.insert(obs.timestamp, obs.clone());
        Ok(AppendOutcome::Appended)
    }

    fn query_range(
        &self,
        key: &SeriesKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>, StorageError> {
        if start >= end {
            return Ok(Vec::new());
        }
        self.with_series(key, |entries| {
            entries
                .range(start..end)
                .map(|(_, o)| o.clone())
                .collect()
        })
    }

    fn exists(&self, key: &SeriesKey, timestamp: DateTime<Utc>) -> Result<bool, StorageError> {
        self.with_series(key, |entries| entries.contains_key(&timestamp))
    }

    fn latest(&self, key: &SeriesKey) -> Result<Option<Observation>, StorageError> {
        self.with_series(key, |entries| entries.values().next_back().cloned())
    }

    fn earliest(&self, key: &SeriesKey) -> Result<Option<Observation>, StorageError> {
        self.with_series(key, |entries| entries.values().next().cloned())
    }

    fn count(&self, key: &SeriesKey) -> Result<usize, StorageError> {
        self.with_series(key, BTreeMap::len)
    }
}
