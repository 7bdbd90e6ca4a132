use thiserror::Error;

use chokepoint_core::{CollectionError, ConfigError, ProcessError, StorageError};

/// Failures that stop the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// An append was lost; ordering and signal state can no longer be trusted.
    #[error("storage write failed: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Another job holds the series lock.
    #[error("series {0} is busy")]
    Busy(String),

    /// A job task panicked or was aborted.
    #[error("job task failed: {0}")]
    Task(String),
}

/// A job that failed for this cycle only. Logged, never fatal.
#[derive(Debug, Error, Clone)]
pub enum JobFailure {
    #[error("collection failed after {attempts} attempt(s): {error}")]
    Collection {
        attempts: u32,
        error: CollectionError,
    },

    #[error("processing failed: {0}")]
    Process(#[from] ProcessError),
}

/// Outcome of a pipeline run: a per-cycle failure or a fatal storage error.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Job(#[from] JobFailure),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
