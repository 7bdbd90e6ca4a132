//! Backfill execution for one series.
//!
//! Every slot is re-checked against the store before fetching, so a slot
//! filled by a live job in the meantime is never fetched again. Slots still
//! missing after the fetch are persisted as unresolved and re-offered on the
//! next full pass.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use chokepoint_core::{
    FrequencyClass, Observation, SeriesKey, SeriesStore, StorageError, TimeRange, ValueType,
};
use chokepoint_data::UnresolvedGapStore;

use crate::error::PipelineError;
use crate::gaps::BackfillGap;
use crate::pipeline::CollectionPipeline;

/// Totals for one or more executed gaps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub gaps: usize,
    /// Slots filled by this run
    pub filled: usize,
    /// Slots found present on re-check and not fetched
    pub skipped_present: usize,
    /// Collector calls issued
    pub fetches: usize,
    /// Slot runs left unresolved
    pub unresolved: usize,
    /// Series skipped because another job held the lock
    pub skipped_busy: usize,
}

impl BackfillReport {
    pub fn merge(&mut self, other: &BackfillReport) {
        self.gaps += other.gaps;
        self.filled += other.filled;
        self.skipped_present += other.skipped_present;
        self.fetches += other.fetches;
        self.unresolved += other.unresolved;
        self.skipped_busy += other.skipped_busy;
    }
}

/// Observations appended by a backfill run, with its report.
#[derive(Debug, Default)]
pub struct BackfillOutcome {
    pub report: BackfillReport,
    pub appended: Vec<Observation>,
}

pub struct BackfillExecutor {
    pipeline: Arc<CollectionPipeline>,
    unresolved: Arc<UnresolvedGapStore>,
}

impl BackfillExecutor {
    pub fn new(pipeline: Arc<CollectionPipeline>, unresolved: Arc<UnresolvedGapStore>) -> Self {
        Self {
            pipeline,
            unresolved,
        }
    }

    #[must_use]
    pub fn unresolved(&self) -> &Arc<UnresolvedGapStore> {
        &self.unresolved
    }

    /// Executes gaps of one series in order. The caller must hold its lock.
    ///
    /// # Errors
    /// Returns `StorageError` if an append or the unresolved store fails.
    pub async fn execute_all(
        &self,
        key: &SeriesKey,
        frequency: FrequencyClass,
        value_type: Option<ValueType>,
        gaps: &[BackfillGap],
        now: DateTime<Utc>,
    ) -> Result<BackfillOutcome, StorageError> {
        let mut outcome = BackfillOutcome::default();
        let mut ordered: Vec<&BackfillGap> = gaps.iter().collect();
        ordered.sort_by_key(|g| g.start);
        for gap in ordered {
            let gap_outcome = self.execute(key, frequency, value_type, gap, now).await?;
            outcome.report.merge(&gap_outcome.report);
            outcome.appended.extend(gap_outcome.appended);
        }
        Ok(outcome)
    }

    /// Executes one gap.
    ///
    /// # Errors
    /// Returns `StorageError` if an append or the unresolved store fails.
    pub async fn execute(
        &self,
        key: &SeriesKey,
        frequency: FrequencyClass,
        value_type: Option<ValueType>,
        gap: &BackfillGap,
        now: DateTime<Utc>,
    ) -> Result<BackfillOutcome, StorageError> {
        let store = self.pipeline.store().as_ref();
        let mut outcome = BackfillOutcome::default();
        outcome.report.gaps = 1;

        let missing = missing_slots(store, key, frequency, gap.start, gap.end)?;
        let total_slots = count_slots(frequency, gap.start, gap.end);
        outcome.report.skipped_present = total_slots - missing.len();

        let mut last_error = String::new();
        for (run_start, run_end) in contiguous_runs(frequency, &missing) {
            let range = TimeRange::new(run_start, frequency.next_slot(run_end));
            outcome.report.fetches += 1;
            match self.pipeline.collect(key, Some(range), value_type).await {
                Ok(result) => {
                    if result.appended.is_empty() {
                        last_error = "no data returned for slot range".to_string();
                    }
                    outcome.appended.extend(result.appended);
                }
                Err(PipelineError::Job(failure)) => {
                    last_error = failure.to_string();
                }
                Err(PipelineError::Storage(e)) => return Err(e),
            }
        }

        let still_missing = missing_slots(store, key, frequency, gap.start, gap.end)?;
        outcome.report.filled = missing.len() - still_missing.len();
        let runs = contiguous_runs(frequency, &still_missing);
        let settled = self
            .unresolved
            .settle(key, frequency, gap.start, gap.end, &runs, &last_error, now)?;
        outcome.report.unresolved = settled.len();

        if settled.is_empty() {
            debug!(
                series = %key,
                start = %gap.start,
                end = %gap.end,
                filled = outcome.report.filled,
                "Gap resolved"
            );
        } else {
            for record in &settled {
                warn!(
                    series = %key,
                    start = %record.start,
                    end = %record.end,
                    attempts = record.attempts,
                    error = %record.last_error,
                    "Backfill unresolved"
                );
            }
        }
        if outcome.report.filled > 0 {
            info!(series = %key, filled = outcome.report.filled, "Backfilled slots");
        }
        Ok(outcome)
    }
}

/// Slot starts in `start..=end` with no observation.
fn missing_slots(
    store: &dyn SeriesStore,
    key: &SeriesKey,
    frequency: FrequencyClass,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>, StorageError> {
    let mut missing = Vec::new();
    let mut slot = start;
    while slot <= end {
        let next = frequency.next_slot(slot);
        if !store.any_in(key, TimeRange::new(slot, next))? {
            missing.push(slot);
        }
        slot = next;
    }
    Ok(missing)
}

fn count_slots(frequency: FrequencyClass, start: DateTime<Utc>, end: DateTime<Utc>) -> usize {
    let mut count = 0;
    let mut slot = start;
    while slot <= end {
        count += 1;
        slot = frequency.next_slot(slot);
    }
    count
}

/// Groups ordered slot starts into `(first, last)` runs of adjacent slots.
fn contiguous_runs(
    frequency: FrequencyClass,
    slots: &[DateTime<Utc>],
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut runs: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::new();
    for &slot in slots {
        match runs.last_mut() {
            Some((_, last)) if frequency.next_slot(*last) == slot => *last = slot,
            _ => runs.push((slot, slot)),
        }
    }
    runs
}
