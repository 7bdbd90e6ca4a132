//! Error types shared across the workspace.
//!
//! Each error maps to one failure class with its own handling policy:
//! configuration errors are fatal at startup, collection errors are retried,
//! evaluation errors skip a single rule/point, and storage write errors are fatal.

use thiserror::Error;

/// Invalid schedule or variable configuration. Detected at load time.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `update_freq` is not one of the recognized frequency classes.
    #[error("unknown frequency class '{0}'")]
    UnknownFrequency(String),

    /// `data_type` is not one of the recognized value types.
    #[error("unknown data type '{0}'")]
    UnknownDataType(String),

    /// `schedule_hour` outside 0..=23.
    #[error("schedule hour {0} out of range (0-23)")]
    HourOutOfRange(u32),

    /// `schedule_minute` outside 0..=59.
    #[error("schedule minute {0} out of range (0-59)")]
    MinuteOutOfRange(u32),

    /// The same series was registered twice.
    #[error("series {0} registered more than once")]
    DuplicateSeries(String),

    /// A variable's source URL has no registered collector.
    #[error("no collector registered for source '{0}'")]
    UnknownSource(String),

    /// A configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file could not be parsed.
    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    /// Any other invalid setting.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Transient upstream failure while fetching a raw payload.
#[derive(Debug, Error, Clone)]
pub enum CollectionError {
    /// Transport-level failure (DNS, connect, reset).
    #[error("network error: {0}")]
    Network(String),

    /// The fetch exceeded the configured timeout and was cancelled.
    #[error("fetch timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The upstream answered with a non-success status.
    #[error("upstream error: {status} - {message}")]
    Upstream { status: u16, message: String },

    /// The upstream body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The collector does not know this series.
    #[error("unsupported series: {0}")]
    Unsupported(String),
}

impl CollectionError {
    /// Returns true if retrying the same request may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            CollectionError::Network(_) | CollectionError::Timeout(_) => true,
            CollectionError::Upstream { status, .. } => *status == 429 || *status >= 500,
            CollectionError::Decode(_) | CollectionError::Unsupported(_) => false,
        }
    }
}

/// Raw payload could not be turned into observations.
#[derive(Debug, Error, Clone)]
pub enum ProcessError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("missing field '{0}'")]
    MissingField(String),
}

/// SeriesStore failure. Append failures are fatal to the run.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Stored data could not be decoded.
    #[error("corrupt record in {location}: {message}")]
    Corrupt { location: String, message: String },

    /// An observation does not belong to the series it was appended to.
    #[error("observation for {actual} appended to {expected}")]
    KeyMismatch { expected: String, actual: String },
}

/// Append-path failures share the storage error type.
pub type StorageWriteError = StorageError;

/// One rule could not be evaluated for one observation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SignalEvaluationError {
    /// The observation's value type does not suit the rule.
    #[error("rule expects {expected} value, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// The value is numerically unusable (NaN, infinite, ...).
    #[error("value out of range: {0}")]
    OutOfRange(String),
}
