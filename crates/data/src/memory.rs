use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use chokepoint_core::{AppendOutcome, Observation, SeriesKey, SeriesStore, StorageError};

/// Process-local SeriesStore. Used by tests and single-pass runs.
#[derive(Debug, Default)]
pub struct InMemorySeriesStore {
    series: RwLock<HashMap<SeriesKey, BTreeMap<DateTime<Utc>, Observation>>>,
}

impl InMemorySeriesStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All keys with at least one observation, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<SeriesKey> {
        let mut keys: Vec<_> = self.series.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

pub(crate) fn check_key(key: &SeriesKey, obs: &Observation) -> Result<(), StorageError> {
    if &obs.key != key {
        return Err(StorageError::KeyMismatch {
            expected: key.to_string(),
            actual: obs.key.to_string(),
        });
    }
    Ok(())
}

impl SeriesStore for InMemorySeriesStore {
    fn append(&self, key: &SeriesKey, obs: &Observation) -> Result<AppendOutcome, StorageError> {
        check_key(key, obs)?;
        let mut series = self.series.write();
        let entries = series.entry(key.clone()).or_default();
        if entries.contains_key(&obs.timestamp) {
            return Ok(AppendOutcome::Duplicate);
        }
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
        let series = self.series.read();
        Ok(series
            .get(key)
            .map(|entries| entries.range(start..end).map(|(_, o)| o.clone()).collect())
            .unwrap_or_default())
    }

    fn exists(&self, key: &SeriesKey, timestamp: DateTime<Utc>) -> Result<bool, StorageError> {
        Ok(self
            .series
            .read()
            .get(key)
            .is_some_and(|entries| entries.contains_key(&timestamp)))
    }

    fn latest(&self, key: &SeriesKey) -> Result<Option<Observation>, StorageError> {
        Ok(self
            .series
            .read()
            .get(key)
            .and_then(|entries| entries.values().next_back().cloned()))
    }

    fn earliest(&self, key: &SeriesKey) -> Result<Option<Observation>, StorageError> {
        Ok(self
            .series
            .read()
            .get(key)
            .and_then(|entries| entries.values().next().cloned()))
    }

    fn count(&self, key: &SeriesKey) -> Result<usize, StorageError> {
        Ok(self.series.read().get(key).map_or(0, BTreeMap::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chokepoint_core::ObservationValue;
    use chrono::{Duration, TimeZone};

    fn key() -> SeriesKey {
        SeriesKey::new("suez-canal", "wait_time_hours")
    }

    fn obs(day: u32, v: f64) -> Observation {
        Observation::new(
            key(),
            Utc.with_ymd_and_hms(2026, 1, day, 0, 0, 0).unwrap(),
            ObservationValue::Number(v),
        )
    }

    #[test]
    fn test_append_and_query_ordered() {
        let store = InMemorySeriesStore::new();
        store.append(&key(), &obs(3, 3.0)).unwrap();
        store.append(&key(), &obs(1, 1.0)).unwrap();
        store.append(&key(), &obs(2, 2.0)).unwrap();

        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let all = store
            .query_range(&key(), start, start + Duration::days(10))
            .unwrap();
        let values: Vec<f64> = all.iter().filter_map(|o| o.value.as_f64()).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);

        assert_eq!(store.latest(&key()).unwrap().unwrap().timestamp, obs(3, 0.0).timestamp);
        assert_eq!(store.earliest(&key()).unwrap().unwrap().timestamp, start);
    }

    #[test]
    fn test_duplicate_timestamp_is_not_written() {
        let store = InMemorySeriesStore::new();
        assert_eq!(store.append(&key(), &obs(1, 1.0)).unwrap(), AppendOutcome::Appended);
        assert_eq!(store.append(&key(), &obs(1, 9.0)).unwrap(), AppendOutcome::Duplicate);
        assert_eq!(store.count(&key()).unwrap(), 1);
        assert_eq!(
            store.latest(&key()).unwrap().unwrap().value,
            ObservationValue::Number(1.0)
        );
    }

    #[test]
    fn test_query_range_is_half_open() {
        let store = InMemorySeriesStore::new();
        store.append(&key(), &obs(1, 1.0)).unwrap();
        store.append(&key(), &obs(2, 2.0)).unwrap();

        let result = store
            .query_range(&key(), obs(1, 0.0).timestamp, obs(2, 0.0).timestamp)
            .unwrap();
        assert_eq!(result.len(), 1);
        assert!(store.exists(&key(), obs(2, 0.0).timestamp).unwrap());
        assert!(!store.exists(&key(), obs(5, 0.0).timestamp).unwrap());
    }

    #[test]
    fn test_rejects_foreign_key() {
        let store = InMemorySeriesStore::new();
        let other = SeriesKey::new("panama-canal", "wait_time_hours");
        assert!(matches!(
            store.append(&other, &obs(1, 1.0)),
            Err(StorageError::KeyMismatch { .. })
        ));
    }
}
