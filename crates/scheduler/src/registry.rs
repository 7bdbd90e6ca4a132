//! Cadence configuration per series, loaded once and immutable afterwards.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use chokepoint_core::{
    ChokepointConfig, ConfigError, FrequencyClass, ScheduleConfig, SeriesKey, ValueType,
    VariableConfig,
};

/// What the registry knows about one series.
#[derive(Debug, Clone)]
pub struct RegisteredSeries {
    pub schedule: ScheduleConfig,
    /// Declared value type; observations of another type are rejected
    pub value_type: Option<ValueType>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleRegistry {
    series: BTreeMap<SeriesKey, RegisteredSeries>,
}

impl ScheduleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a loaded chokepoint catalog.
    ///
    /// # Errors
    /// Returns `ConfigError::DuplicateSeries` if a series appears twice.
    pub fn from_catalog(catalog: &[ChokepointConfig]) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for chokepoint in catalog {
            for variable in &chokepoint.variables {
                registry.register_variable(variable)?;
            }
        }
        tracing::info!(series = registry.len(), "Schedule registry loaded");
        Ok(registry)
    }

    /// Registers a cadence for `key`.
    ///
    /// # Errors
    /// Returns `ConfigError::DuplicateSeries` if `key` is already registered.
    pub fn register(&mut self, key: SeriesKey, schedule: ScheduleConfig) -> Result<(), ConfigError> {
        self.insert(
            key,
            RegisteredSeries {
                schedule,
                value_type: None,
                source: None,
            },
        )
    }

    /// Registers a cadence from raw configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError` for an unknown frequency, out-of-range hour or
    /// minute, or a duplicate key.
    pub fn register_raw(
        &mut self,
        key: SeriesKey,
        update_freq: &str,
        hour: u32,
        minute: u32,
    ) -> Result<(), ConfigError> {
        self.register(key, ScheduleConfig::parse(update_freq, hour, minute)?)
    }

    /// Registers a fully configured variable.
    ///
    /// # Errors
    /// Returns `ConfigError::DuplicateSeries` if the key is already registered.
    pub fn register_variable(&mut self, variable: &VariableConfig) -> Result<(), ConfigError> {
        self.insert(
            variable.key.clone(),
            RegisteredSeries {
                schedule: variable.schedule,
                value_type: Some(variable.value_type),
                source: (!variable.source.is_empty()).then(|| variable.source.clone()),
            },
        )
    }

    fn insert(&mut self, key: SeriesKey, series: RegisteredSeries) -> Result<(), ConfigError> {
        if self.series.contains_key(&key) {
            return Err(ConfigError::DuplicateSeries(key.to_string()));
        }
        self.series.insert(key, series);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, key: &SeriesKey) -> Option<&RegisteredSeries> {
        self.series.get(key)
    }

    #[must_use]
    pub fn frequency(&self, key: &SeriesKey) -> Option<FrequencyClass> {
        self.series.get(key).map(|s| s.schedule.frequency())
    }

    /// Next fire time for `key` strictly after `now`.
    #[must_use]
    pub fn next_fire(&self, key: &SeriesKey, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.series.get(key).map(|s| s.schedule.next_fire(now))
    }

    /// Keys with a fire time in `(since, now]`, in key order.
    #[must_use]
    pub fn due(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> Vec<SeriesKey> {
        self.series
            .iter()
            .filter(|(_, s)| s.schedule.fired_between(since, now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &SeriesKey> {
        self.series.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SeriesKey, &RegisteredSeries)> {
        self.series.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.series.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}
