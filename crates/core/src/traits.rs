use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{CollectionError, ProcessError, StorageError};
use crate::events::SignalEvent;
use crate::types::{Observation, SeriesKey, TimeRange};

/// Opaque upstream response handed from a Collector to a Processor.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload {
    pub key: SeriesKey,
    pub body: serde_json::Value,
}

impl RawPayload {
    pub fn new(key: SeriesKey, body: serde_json::Value) -> Self {
        Self { key, body }
    }
}

/// Result of appending a single observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// An observation already exists at this timestamp; nothing was written.
    Duplicate,
}

#[async_trait]
pub trait Collector: Send + Sync {
    /// Fetches raw data for one series, optionally limited to `range`.
    async fn fetch(
        &self,
        key: &SeriesKey,
        range: Option<TimeRange>,
    ) -> Result<RawPayload, CollectionError>;

    fn name(&self) -> &str;
}

pub trait Processor: Send + Sync {
    /// Turns a raw payload into typed observations for `payload.key`.
    fn transform(&self, payload: &RawPayload) -> Result<Vec<Observation>, ProcessError>;
}

/// Append-only, per-key ordered observation history.
pub trait SeriesStore: Send + Sync {
    /// Appends one observation.
    ///
    /// # Errors
    /// Any error here is a `StorageWriteError` and fatal to the run.
    fn append(&self, key: &SeriesKey, obs: &Observation) -> Result<AppendOutcome, StorageError>;

    /// Observations with `start <= timestamp < end`, ordered by timestamp.
    fn query_range(
        &self,
        key: &SeriesKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>, StorageError>;

    fn exists(&self, key: &SeriesKey, timestamp: DateTime<Utc>) -> Result<bool, StorageError>;

    fn latest(&self, key: &SeriesKey) -> Result<Option<Observation>, StorageError>;

    fn earliest(&self, key: &SeriesKey) -> Result<Option<Observation>, StorageError>;

    fn count(&self, key: &SeriesKey) -> Result<usize, StorageError>;

    /// Returns true if any observation lies in `range`.
    fn any_in(&self, key: &SeriesKey, range: TimeRange) -> Result<bool, StorageError> {
        Ok(!self.query_range(key, range.start, range.end)?.is_empty())
    }
}

/// Downstream consumer of signal events. Delivery is not retried by the engine.
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn deliver(&self, event: &SignalEvent) -> anyhow::Result<()>;

    fn name(&self) -> &str;
}
