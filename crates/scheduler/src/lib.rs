//! Scheduled collection for chokepoint series.
//!
//! This crate provides:
//! - `ScheduleRegistry`: per-series cadence, loaded once
//! - `JobDispatcher`: the tick loop, one task per due series
//! - `GapDetector` and `BackfillExecutor`: missing-slot detection and refill
//! - `SourceRouter`: collector and processor selection by source host

pub mod backfill;
pub mod dispatcher;
pub mod error;
pub mod gaps;
pub mod locks;
pub mod pipeline;
pub mod registry;
pub mod retry;
pub mod routing;

pub use backfill::{BackfillExecutor, BackfillOutcome, BackfillReport};
pub use dispatcher::{
    DispatcherCommand, GapSummary, JobDispatcher, JobKind, JobReport, TickReport,
};
pub use error::{DispatchError, JobFailure, PipelineError};
pub use gaps::{BackfillGap, BackfillPlanner, GapDetector, GapScan};
pub use locks::{KeyGuard, KeyLocks};
pub use pipeline::{CollectResult, CollectionPipeline};
pub use registry::{RegisteredSeries, ScheduleRegistry};
pub use retry::{fetch_with_retry, RetryDecision, RetryPolicy, RetryState};
pub use routing::{SourceRoute, SourceRouter};
