//! CLI commands for the chokepoint collection engine.

pub mod backfill;
pub mod check;
pub mod collect;
pub mod export;
pub mod once;
pub mod start;
pub mod status;

pub use backfill::{run_backfill, BackfillArgs};
pub use check::{run_check, CheckArgs};
pub use collect::{run_collect, CollectArgs};
pub use export::{run_export, ExportArgs};
pub use once::{run_once, OnceArgs};
pub use start::{run_start, StartArgs};
pub use status::{run_status, StatusArgs};
