pub mod catalog;
pub mod engine;
pub mod registry;
pub mod rules;
pub mod sinks;
pub mod state;

pub use catalog::{build_registry, default_rules, load_rules};
pub use engine::{EngineStats, SignalEngine};
pub use registry::SignalRegistry;
pub use rules::{Condition, RateDirection, RuleKind, SignalRule, Transition};
pub use sinks::{ChannelSink, JsonlSink, LogSink};
pub use state::{SignalState, SignalStatePersistence, StateKey};
