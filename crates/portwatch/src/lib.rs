//! IMF PortWatch integration.
//!
//! `PortWatchClient` fetches daily chokepoint transit counts from the ArcGIS
//! feature service; `PortWatchProcessor` turns them into one observation per
//! day. Both plug into the scheduler through the `Collector` and `Processor`
//! traits.

pub mod client;
pub mod processor;
pub mod types;

pub use client::{portid, PortWatchClient, INCREMENTAL_RECORD_COUNT, PORTWATCH_HOST};
pub use processor::{attribute_for, PortWatchProcessor};
pub use types::{Feature, QueryError, QueryResponse};
