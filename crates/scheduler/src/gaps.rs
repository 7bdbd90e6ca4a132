//! Gap detection and backfill planning.
//!
//! A series is expected to have one observation per canonical slot of its
//! frequency, from the slot of its first observation (or a configured start
//! for an empty series) up to the last slot that began at least one grace
//! period before `now`. Missing slots are merged into maximal contiguous gaps.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

use chokepoint_core::{
    BackfillConfig, FrequencyClass, SeriesKey, SeriesStore, StorageError, TimeRange,
};

/// A maximal run of missing slots `start..=end` (both slot starts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillGap {
    pub key: SeriesKey,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub slots: usize,
}

impl BackfillGap {
    /// The half-open time range covered by the gap.
    #[must_use]
    pub fn range(&self, frequency: FrequencyClass) -> TimeRange {
        TimeRange::new(self.start, frequency.next_slot(self.end))
    }
}

/// Result of scanning one series.
#[derive(Debug, Clone, Serialize)]
pub struct GapScan {
    pub key: SeriesKey,
    pub series_start: DateTime<Utc>,
    /// Slots starting after this are not yet expected
    pub cutoff: DateTime<Utc>,
    pub expected_slots: usize,
    pub missing_slots: usize,
    pub gaps: Vec<BackfillGap>,
    /// The slot cap was reached; slots older than the newest `max_slots`
    /// were not checked
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct GapDetector {
    grace: Option<Duration>,
    lookback: Duration,
    epoch: Option<DateTime<Utc>>,
    max_slots: usize,
}

impl Default for GapDetector {
    fn default() -> Self {
        Self::from(&BackfillConfig::default())
    }
}

impl From<&BackfillConfig> for GapDetector {
    fn from(config: &BackfillConfig) -> Self {
        Self {
            grace: config.grace_secs.map(|s| {
                Duration::seconds(i64::try_from(s).unwrap_or(i64::MAX).min(i64::MAX / 1_000))
            }),
            lookback: Duration::days(i64::from(config.lookback_days)),
            epoch: config.epoch,
            max_slots: config.max_slots_per_scan.max(1),
        }
    }
}

impl GapDetector {
    /// Sets a fixed grace period for all frequencies.
    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = Some(grace);
        self
    }

    /// Sets the start used for empty series.
    #[must_use]
    pub fn with_epoch(mut self, epoch: DateTime<Utc>) -> Self {
        self.epoch = Some(epoch);
        self
    }

    #[must_use]
    pub fn with_max_slots(mut self, max_slots: usize) -> Self {
        self.max_slots = max_slots.max(1);
        self
    }

    /// Grace period for `frequency`: configured, else one nominal period.
    #[must_use]
    pub fn grace_for(&self, frequency: FrequencyClass) -> Duration {
        self.grace.unwrap_or_else(|| frequency.nominal_period())
    }

    /// Compares expected slots against the store.
    ///
    /// # Errors
    /// Returns `StorageError` if the store cannot be read.
    pub fn scan(
        &self,
        store: &dyn SeriesStore,
        key: &SeriesKey,
        frequency: FrequencyClass,
        now: DateTime<Utc>,
    ) -> Result<GapScan, StorageError> {
        let first = match store.earliest(key)? {
            Some(obs) => obs.timestamp,
            None => self.epoch.unwrap_or(now - self.lookback),
        };
        let series_start = frequency.slot_floor(first);
        let cutoff = now - self.grace_for(frequency);

        // Newest slots first, so a capped scan keeps the window next to `now`.
        let mut expected = Vec::new();
        let mut slot = frequency.slot_floor(cutoff);
        let mut truncated = false;
        while slot >= series_start {
            if expected.len() >= self.max_slots {
                truncated = true;
                break;
            }
            expected.push(slot);
            slot = frequency.slot_floor(slot - Duration::seconds(1));
        }
        expected.reverse();
        if truncated {
            warn!(
                series = %key,
                max_slots = self.max_slots,
                "Gap scan truncated at slot cap, oldest slots not checked"
            );
        }

        let filled: HashSet<DateTime<Utc>> = match (expected.first(), expected.last()) {
            (Some(&first), Some(&last)) => store
                .query_range(key, first, frequency.next_slot(last))?
                .iter()
                .map(|obs| frequency.slot_floor(obs.timestamp))
                .collect(),
            _ => HashSet::new(),
        };

        let mut gaps: Vec<BackfillGap> = Vec::new();
        let mut missing_slots = 0;
        let mut previous_missing = false;
        for &slot in &expected {
            if filled.contains(&slot) {
                previous_missing = false;
                continue;
            }
            missing_slots += 1;
            match gaps.last_mut() {
                Some(gap) if previous_missing => {
                    gap.end = slot;
                    gap.slots += 1;
                }
                _ => gaps.push(BackfillGap {
                    key: key.clone(),
                    start: slot,
                    end: slot,
                    slots: 1,
                }),
            }
            previous_missing = true;
        }

        Ok(GapScan {
            key: key.clone(),
            series_start,
            cutoff,
            expected_slots: expected.len(),
            missing_slots,
            gaps,
            truncated,
        })
    }
}

/// Pending backfill work, per series, oldest gap first.
#[derive(Debug, Default)]
pub struct BackfillPlanner {
    pending: BTreeMap<SeriesKey, BTreeMap<DateTime<Utc>, BackfillGap>>,
}

impl BackfillPlanner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the pending gaps of `key` with a fresh plan.
    pub fn replace(&mut self, key: &SeriesKey, gaps: Vec<BackfillGap>) {
        if gaps.is_empty() {
            self.pending.remove(key);
            return;
        }
        self.pending
            .insert(key.clone(), gaps.into_iter().map(|g| (g.start, g)).collect());
    }

    /// Adds gaps, keeping the wider one when two share a start.
    pub fn extend(&mut self, gaps: impl IntoIterator<Item = BackfillGap>) {
        for gap in gaps {
            let entries = self.pending.entry(gap.key.clone()).or_default();
            match entries.get(&gap.start) {
                Some(existing) if existing.end >= gap.end => {}
                _ => {
                    entries.insert(gap.start, gap);
                }
            }
        }
    }

    /// Removes and returns all gaps of `key`, oldest first.
    pub fn take(&mut self, key: &SeriesKey) -> Vec<BackfillGap> {
        self.pending
            .remove(key)
            .map(|gaps| gaps.into_values().collect())
            .unwrap_or_default()
    }

    /// Returns gaps taken earlier but not executed.
    pub fn requeue(&mut self, gaps: Vec<BackfillGap>) {
        self.extend(gaps);
    }

    #[must_use]
    pub fn pending_keys(&self) -> Vec<SeriesKey> {
        self.pending.keys().cloned().collect()
    }

    #[must_use]
    pub fn pending_gaps(&self) -> usize {
        self.pending.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
