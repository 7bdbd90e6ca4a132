//! Per-chokepoint variable configuration (`state_variables.json`).
//!
//! Each chokepoint directory holds one JSON object mapping variable names to
//! their description, source URL, cadence, and value type. Invalid entries
//! are fatal; a directory without the file is not a chokepoint.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::schedule::ScheduleConfig;
use crate::types::{Chokepoint, SeriesKey, ValueType};

pub const STATE_VARIABLES_FILE: &str = "state_variables.json";

/// One entry as written in `state_variables.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct VariableSpec {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source: String,
    #[serde(default = "default_update_freq")]
    pub update_freq: String,
    #[serde(default)]
    pub schedule_hour: Option<u32>,
    #[serde(default)]
    pub schedule_minute: Option<u32>,
    #[serde(default = "default_data_type")]
    pub data_type: String,
}

fn default_update_freq() -> String {
    "daily".to_string()
}

fn default_data_type() -> String {
    "number".to_string()
}

/// A validated variable of one chokepoint.
#[derive(Debug, Clone)]
pub struct VariableConfig {
    pub key: SeriesKey,
    pub description: String,
    pub source: String,
    pub schedule: ScheduleConfig,
    pub value_type: ValueType,
}

impl VariableConfig {
    /// Validates a raw spec.
    ///
    /// # Errors
    /// Returns `ConfigError` for an unknown frequency or data type, or an
    /// out-of-range schedule time.
    pub fn from_spec(key: SeriesKey, spec: VariableSpec) -> Result<Self, ConfigError> {
        let schedule = ScheduleConfig::parse(
            &spec.update_freq,
            spec.schedule_hour.unwrap_or(0),
            spec.schedule_minute.unwrap_or(0),
        )?;
        let value_type = spec.data_type.parse()?;
        Ok(Self {
            key,
            description: spec.description,
            source: spec.source,
            schedule,
            value_type,
        })
    }
}

/// All variables configured for one chokepoint.
#[derive(Debug, Clone)]
pub struct ChokepointConfig {
    pub chokepoint: Chokepoint,
    pub variables: Vec<VariableConfig>,
}

impl ChokepointConfig {
    /// Parses the contents of one `state_variables.json`.
    ///
    /// # Errors
    /// Returns `ConfigError::Parse` for invalid JSON and the validation error
    /// of the first invalid variable otherwise.
    pub fn from_json(chokepoint: Chokepoint, path: &str, json: &str) -> Result<Self, ConfigError> {
        let specs: BTreeMap<String, VariableSpec> =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        let variables = specs
            .into_iter()
            .map(|(name, spec)| {
                let key = SeriesKey::new(chokepoint.id.clone(), name);
                VariableConfig::from_spec(key.clone(), spec).map_err(|e| ConfigError::Invalid(
                    format!("{key} in {path}: {e}"),
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            chokepoint,
            variables,
        })
    }

    /// Loads `<dir>/state_variables.json`; the directory name is the chokepoint id.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or is invalid.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let id = dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ConfigError::Invalid(format!("bad chokepoint dir {}", dir.display())))?;
        let path = dir.join(STATE_VARIABLES_FILE);
        let display = path.display().to_string();
        let json = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        Self::from_json(Chokepoint::from_id(id), &display, &json)
    }
}

/// Loads every chokepoint under `root`, ordered by id.
///
/// # Errors
/// Returns `ConfigError` if `root` cannot be listed or any chokepoint's
/// configuration is invalid.
pub fn load_catalog(root: &Path) -> Result<Vec<ChokepointConfig>, ConfigError> {
    let entries = fs::read_dir(root).map_err(|source| ConfigError::Io {
        path: root.display().to_string(),
        source,
    })?;

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ConfigError::Io {
            path: root.display().to_string(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() && path.join(STATE_VARIABLES_FILE).is_file() {
            dirs.push(path);
        }
    }
    dirs.sort();

    let catalog = dirs
        .iter()
        .map(|dir| ChokepointConfig::load(dir))
        .collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(chokepoints = catalog.len(), root = %root.display(), "Loaded chokepoint catalog");
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::FrequencyClass;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"{
        "vessel_arrivals": {
            "description": "Daily vessel arrivals",
            "source": "https://portwatch.imf.org/pages/chokepoint4",
            "update_freq": "daily",
            "schedule_hour": 2,
            "schedule_minute": 30,
            "data_type": "number"
        },
        "transit_status": {
            "source": "https://example.org/status",
            "update_freq": "hourly",
            "schedule_minute": 5,
            "data_type": "enum"
        }
    }"#;

    #[test]
    fn test_parse_valid_config() {
        let cfg =
            ChokepointConfig::from_json(Chokepoint::from_id("bab-el-mandeb"), "mem", SAMPLE)
                .unwrap();
        assert_eq!(cfg.variables.len(), 2);

        let arrivals = cfg
            .variables
            .iter()
            .find(|v| v.key.variable == "vessel_arrivals")
            .unwrap();
        assert_eq!(arrivals.schedule.frequency(), FrequencyClass::Daily);
        assert_eq!(arrivals.schedule.hour(), 2);
        assert_eq!(arrivals.schedule.minute(), 30);
        assert_eq!(arrivals.value_type, ValueType::Number);

        let status = cfg
            .variables
            .iter()
            .find(|v| v.key.variable == "transit_status")
            .unwrap();
        assert_eq!(status.schedule.hour(), 0);
        assert_eq!(status.value_type, ValueType::Enum);
    }

    #[test]
    fn test_unknown_frequency_is_fatal() {
        let json = r#"{"x": {"update_freq": "fortnightly", "data_type": "number"}}"#;
        let err = ChokepointConfig::from_json(Chokepoint::from_id("a"), "mem", json).unwrap_err();
        assert!(err.to_string().contains("fortnightly"));
    }

    #[test]
    fn test_out_of_range_hour_is_fatal() {
        let json = r#"{"x": {"update_freq": "daily", "schedule_hour": 24}}"#;
        assert!(ChokepointConfig::from_json(Chokepoint::from_id("a"), "mem", json).is_err());
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = ChokepointConfig::from_json(Chokepoint::from_id("a"), "mem", "{not json")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_catalog_skips_dirs_without_config() {
        let root = tempdir().unwrap();
        let suez = root.path().join("suez-canal");
        fs::create_dir(&suez).unwrap();
        fs::write(suez.join(STATE_VARIABLES_FILE), SAMPLE).unwrap();
        fs::create_dir(root.path().join("notes")).unwrap();

        let catalog = load_catalog(root.path()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].chokepoint.id, "suez-canal");
        assert_eq!(catalog[0].chokepoint.name, "Suez Canal");
    }
}
