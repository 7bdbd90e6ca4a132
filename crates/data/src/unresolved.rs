//! Persisted backfill gaps that exhausted their retry budget.
//!
//! Records survive restarts in a JSON file so a failed gap is re-offered on
//! the next full pass instead of being lost. A missing or corrupt file
//! starts an empty set.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use chokepoint_core::{FrequencyClass, SeriesKey, StorageError};

/// One unresolved interval `[start, end]` of canonical slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedGap {
    pub key: SeriesKey,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: String,
    pub first_failed_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedGaps {
    gaps: Vec<UnresolvedGap>,
}

type GapId = (SeriesKey, DateTime<Utc>);

pub struct UnresolvedGapStore {
    path: Option<PathBuf>,
    gaps: Mutex<BTreeMap<GapId, UnresolvedGap>>,
}

impl UnresolvedGapStore {
    /// A store that is never written to disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            gaps: Mutex::new(BTreeMap::new()),
        }
    }

    /// Loads the store from `path`.
    #[must_use]
    pub fn load(path: PathBuf) -> Self {
        let gaps = if path.exists() {
            match Self::read(&path) {
                Ok(persisted) => {
                    info!(path = %path.display(), count = persisted.gaps.len(), "Loaded unresolved gaps");
                    persisted.gaps
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to load unresolved gaps, starting fresh");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let gaps = gaps
            .into_iter()
            .map(|g| ((g.key.clone(), g.start), g))
            .collect();
        Self {
            path: Some(path),
            gaps: Mutex::new(gaps),
        }
    }

    fn read(path: &Path) -> Result<PersistedGaps, StorageError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    fn save(&self, gaps: &BTreeMap<GapId, UnresolvedGap>) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let persisted = PersistedGaps {
            gaps: gaps.values().cloned().collect(),
        };
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &persisted)?;
        debug!(path = %path.display(), count = persisted.gaps.len(), "Saved unresolved gaps");
        Ok(())
    }

    /// Records a failed attempt for `[start, end]`.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    pub fn record_failure(
        &self,
        key: &SeriesKey,
        frequency: FrequencyClass,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<UnresolvedGap, StorageError> {
        let mut settled = self.settle(key, frequency, start, end, &[(start, end)], error, now)?;
        settled.pop().ok_or_else(|| StorageError::Corrupt {
            location: "unresolved gaps".to_string(),
            message: "failure was not recorded".to_string(),
        })
    }

    /// Replaces whatever is recorded for the slots `[start, end]` with the
    /// `still_missing` runs.
    ///
    /// Records overlapping `[start, end]` are removed; their parts outside
    /// it are kept. A new record inherits the attempt count and first failure
    /// time of the old records it overlaps, plus one attempt.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    #[allow(clippy::too_many_arguments)]
    pub fn settle(
        &self,
        key: &SeriesKey,
        frequency: FrequencyClass,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        still_missing: &[(DateTime<Utc>, DateTime<Utc>)],
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<UnresolvedGap>, StorageError> {
        let mut gaps = self.gaps.lock();
        let previous = take_overlapping(&mut gaps, key, frequency, start, end);
        if previous.is_empty() && still_missing.is_empty() {
            return Ok(Vec::new());
        }

        let mut recorded = Vec::with_capacity(still_missing.len());
        for &(run_start, run_end) in still_missing {
            let overlapping: Vec<&UnresolvedGap> = previous
                .iter()
                .filter(|g| g.start <= run_end && g.end >= run_start)
                .collect();
            let record = UnresolvedGap {
                key: key.clone(),
                start: run_start,
                end: run_end,
                attempts: overlapping.iter().map(|g| g.attempts).max().unwrap_or(0) + 1,
                last_error: error.to_string(),
                first_failed_at: overlapping
                    .iter()
                    .map(|g| g.first_failed_at)
                    .min()
                    .unwrap_or(now),
                last_attempt_at: now,
            };
            gaps.insert((key.clone(), run_start), record.clone());
            recorded.push(record);
        }
        self.save(&gaps)?;
        Ok(recorded)
    }

    /// Clears the slots `[start, end]` for `key`, clipping records that
    /// extend past it. Returns the number of records touched.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    pub fn resolve(
        &self,
        key: &SeriesKey,
        frequency: FrequencyClass,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        let mut gaps = self.gaps.lock();
        let touched = take_overlapping(&mut gaps, key, frequency, start, end).len();
        if touched > 0 {
            self.save(&gaps)?;
        }
        Ok(touched)
    }

    #[must_use]
    pub fn for_key(&self, key: &SeriesKey) -> Vec<UnresolvedGap> {
        self.gaps
            .lock()
            .values()
            .filter(|g| &g.key == key)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn all(&self) -> Vec<UnresolvedGap> {
        self.gaps.lock().values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.gaps.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.gaps.lock().is_empty()
    }
}

/// Removes every record of `key` overlapping `[start, end]` and puts back
/// the parts lying outside it. Returns the removed records as they were.
fn take_overlapping(
    gaps: &mut BTreeMap<GapId, UnresolvedGap>,
    key: &SeriesKey,
    frequency: FrequencyClass,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<UnresolvedGap> {
    let ids: Vec<GapId> = gaps
        .iter()
        .filter(|((k, _), g)| k == key && g.start <= end && g.end >= start)
        .map(|(id, _)| id.clone())
        .collect();

    let mut removed = Vec::with_capacity(ids.len());
    for id in ids {
        let Some(gap) = gaps.remove(&id) else {
            continue;
        };
        if gap.start < start {
            let before = frequency.slot_floor(start - Duration::seconds(1));
            gaps.insert(
                (key.clone(), gap.start),
                UnresolvedGap {
                    end: before,
                    ..gap.clone()
                },
            );
        }
        if gap.end > end {
            let after = frequency.next_slot(end);
            gaps.insert(
                (key.clone(), after),
                UnresolvedGap {
                    start: after,
                    ..gap.clone()
                },
            );
        }
        removed.push(gap);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::TempDir;

    const DAILY: FrequencyClass = FrequencyClass::Daily;

    fn key() -> SeriesKey {
        SeriesKey::new("strait-of-hormuz", "vessel_arrivals")
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_failures_accumulate_attempts() {
        let store = UnresolvedGapStore::in_memory();
        store.record_failure(&key(), DAILY, day(1), day(3), "timeout", day(10)).unwrap();
        let second = store
            .record_failure(&key(), DAILY, day(1), day(3), "503", day(11))
            .unwrap();

        assert_eq!(second.attempts, 2);
        assert_eq!(second.last_error, "503");
        assert_eq!(second.first_failed_at, day(10));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_resolve_clears_overlapping_records() {
        let store = UnresolvedGapStore::in_memory();
        store.record_failure(&key(), DAILY, day(1), day(2), "x", day(10)).unwrap();
        store.record_failure(&key(), DAILY, day(5), day(5), "x", day(10)).unwrap();

        assert_eq!(store.resolve(&key(), DAILY, day(1), day(3)).unwrap(), 1);
        let left = store.for_key(&key());
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].start, day(5));
    }

    #[test]
    fn test_settle_keeps_history_of_still_missing_runs() {
        let store = UnresolvedGapStore::in_memory();
        store.record_failure(&key(), DAILY, day(1), day(4), "timeout", day(10)).unwrap();

        // days 1-2 filled, 3-4 still missing
        let settled = store
            .settle(&key(), DAILY, day(1), day(4), &[(day(3), day(4))], "empty", day(11))
            .unwrap();
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].attempts, 2);
        assert_eq!(settled[0].first_failed_at, day(10));

        let left = store.for_key(&key());
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].start, day(3));

        // fully filled
        store.settle(&key(), DAILY, day(1), day(4), &[], "", day(12)).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_settling_inner_slot_clips_wider_record() {
        let store = UnresolvedGapStore::in_memory();
        store.record_failure(&key(), DAILY, day(3), day(5), "timeout", day(10)).unwrap();

        // days 3 and 5 were filled elsewhere; day 4 is re-attempted and fills
        store.settle(&key(), DAILY, day(4), day(4), &[], "", day(12)).unwrap();

        let left = store.for_key(&key());
        assert_eq!(left.len(), 2);
        assert_eq!((left[0].start, left[0].end), (day(3), day(3)));
        assert_eq!((left[1].start, left[1].end), (day(5), day(5)));
        assert_eq!(left[1].attempts, 1);
        assert_eq!(left[1].first_failed_at, day(10));
    }

    #[test]
    fn test_settle_replaces_overlapping_record_edge() {
        let store = UnresolvedGapStore::in_memory();
        store.record_failure(&key(), DAILY, day(3), day(5), "timeout", day(10)).unwrap();

        let settled = store
            .settle(&key(), DAILY, day(4), day(6), &[(day(6), day(6))], "empty", day(12))
            .unwrap();
        assert_eq!(settled[0].attempts, 1);

        let left = store.for_key(&key());
        assert_eq!(left.len(), 2);
        assert_eq!((left[0].start, left[0].end), (day(3), day(3)));
        assert_eq!((left[1].start, left[1].end), (day(6), day(6)));
    }

    #[test]
    fn test_persists_across_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("unresolved_gaps.json");
        {
            let store = UnresolvedGapStore::load(path.clone());
            store.record_failure(&key(), DAILY, day(1), day(2), "timeout", day(10)).unwrap();
        }
        let store = UnresolvedGapStore::load(path);
        assert_eq!(store.all().len(), 1);
        assert_eq!(store.all()[0].last_error, "timeout");
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("unresolved_gaps.json");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"{ not json").unwrap();

        let store = UnresolvedGapStore::load(path);
        assert!(store.is_empty());
    }
}
