pub mod config;
pub mod config_loader;
pub mod error;
pub mod events;
pub mod schedule;
pub mod traits;
pub mod types;
pub mod variables;

pub use config::{
    AppConfig, BackfillConfig, DispatcherConfig, PathsConfig, PortWatchConfig, RetryConfig,
    SignalsConfig,
};
pub use config_loader::ConfigLoader;
pub use error::{
    CollectionError, ConfigError, ProcessError, SignalEvaluationError, StorageError,
    StorageWriteError,
};
pub use events::{ImpactHint, ObservationRef, SignalEvent, SignalType};
pub use schedule::{FrequencyClass, ScheduleConfig};
pub use traits::{AppendOutcome, Collector, Processor, RawPayload, SeriesStore, SignalSink};
pub use types::{Chokepoint, Observation, ObservationValue, SeriesKey, TimeRange, ValueType};
pub use variables::{load_catalog, ChokepointConfig, VariableConfig, VariableSpec};
