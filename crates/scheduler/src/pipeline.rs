//! Fetch, transform, and append for one series.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use chokepoint_core::{
    AppendOutcome, Collector, Observation, Processor, SeriesKey, SeriesStore, TimeRange, ValueType,
};

use crate::error::PipelineError;
use crate::retry::{fetch_with_retry, RetryPolicy};

/// What one pipeline run stored.
#[derive(Debug, Clone, Default)]
pub struct CollectResult {
    /// Observations produced by the processor
    pub fetched: usize,
    /// Newly stored observations, oldest first
    pub appended: Vec<Observation>,
    pub duplicates: usize,
    /// Dropped for wrong key, wrong value type, or outside the requested range
    pub rejected: usize,
}

pub struct CollectionPipeline {
    collector: Arc<dyn Collector>,
    processor: Arc<dyn Processor>,
    store: Arc<dyn SeriesStore>,
    retry: RetryPolicy,
    fetch_timeout: Duration,
}

impl CollectionPipeline {
    pub fn new(
        collector: Arc<dyn Collector>,
        processor: Arc<dyn Processor>,
        store: Arc<dyn SeriesStore>,
    ) -> Self {
        Self {
            collector,
            processor,
            store,
            retry: RetryPolicy::default(),
            fetch_timeout: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SeriesStore> {
        &self.store
    }

    /// Collects `key`, keeping only observations inside `range` when given.
    ///
    /// The caller must hold the series lock.
    ///
    /// # Errors
    /// `PipelineError::Job` for a failed cycle, `PipelineError::Storage` if
    /// an append failed.
    pub async fn collect(
        &self,
        key: &SeriesKey,
        range: Option<TimeRange>,
        value_type: Option<ValueType>,
    ) -> Result<CollectResult, PipelineError> {
        let payload = fetch_with_retry(
            self.collector.as_ref(),
            key,
            range,
            &self.retry,
            self.fetch_timeout,
        )
        .await?;
        let mut observations = self.processor.transform(&payload).map_err(|e| {
            warn!(series = %key, error = %e, "Processing failed");
            crate::error::JobFailure::from(e)
        })?;
        observations.sort_by_key(|o| o.timestamp);

        let mut result = CollectResult {
            fetched: observations.len(),
            ..CollectResult::default()
        };

        for obs in observations {
            if &obs.key != key || range.is_some_and(|r| !r.contains(obs.timestamp)) {
                result.rejected += 1;
                continue;
            }
            if let Some(expected) = value_type {
                if obs.value_type() != expected {
                    warn!(
                        series = %key,
                        timestamp = %obs.timestamp,
                        expected = %expected,
                        actual = %obs.value_type(),
                        "Dropping observation with wrong value type"
                    );
                    result.rejected += 1;
                    continue;
                }
            }
            match self.store.append(key, &obs)? {
                AppendOutcome::Appended => result.appended.push(obs),
                AppendOutcome::Duplicate => result.duplicates += 1,
            }
        }

        debug!(
            series = %key,
            fetched = result.fetched,
            appended = result.appended.len(),
            duplicates = result.duplicates,
            rejected = result.rejected,
            "Collection complete"
        );
        Ok(result)
    }
}
