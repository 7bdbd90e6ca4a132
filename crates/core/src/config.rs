use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub dispatcher: DispatcherConfig,
    pub backfill: BackfillConfig,
    pub portwatch: PortWatchConfig,
    pub signals: SignalsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Holds one `<id>/state_variables.json` per chokepoint.
    pub chokepoints_dir: PathBuf,
    /// Root of the per-series CSV files.
    pub data_dir: PathBuf,
    /// Signal state, unresolved gaps, and the event log.
    pub state_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            chokepoints_dir: PathBuf::from("config/chokepoints"),
            data_dir: PathBuf::from("data"),
            state_dir: PathBuf::from("state"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub tick_secs: u64,
    /// Per-attempt fetch timeout; an expired attempt is cancelled.
    pub fetch_timeout_secs: u64,
    pub retry: RetryConfig,
}

impl DispatcherConfig {
    #[must_use]
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_secs: 60,
            fetch_timeout_secs: 60,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    /// Overrides the per-frequency grace period (one nominal period).
    pub grace_secs: Option<u64>,
    /// Start of an empty series when no epoch is configured.
    pub lookback_days: u32,
    pub epoch: Option<DateTime<Utc>>,
    pub full_scan_interval_secs: u64,
    pub max_slots_per_scan: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            grace_secs: None,
            lookback_days: 30,
            epoch: None,
            full_scan_interval_secs: 3_600,
            max_slots_per_scan: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortWatchConfig {
    pub query_url: String,
    pub requests_per_minute: u32,
    pub timeout_secs: u64,
}

impl Default for PortWatchConfig {
    fn default() -> Self {
        Self {
            query_url: "https://services9.arcgis.com/weJ1QsnbMYJlCHdG/arcgis/rest/services/Daily_Chokepoints_Data/FeatureServer/0/query".to_string(),
            requests_per_minute: 30,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalsConfig {
    /// JSON rule list replacing the built-in catalog.
    pub rules_file: Option<PathBuf>,
    /// Append emitted events to `<state_dir>/signals.jsonl`.
    pub jsonl_sink: bool,
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            rules_file: None,
            jsonl_sink: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_sections_use_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"dispatcher": {"tick_secs": 5}}"#).unwrap();
        assert_eq!(config.dispatcher.tick_secs, 5);
        assert_eq!(config.dispatcher.retry.max_attempts, 3);
        assert_eq!(config.backfill.lookback_days, 30);
        assert_eq!(config.paths.state_dir, PathBuf::from("state"));
    }

    #[test]
    fn test_zero_durations_are_clamped() {
        let config = DispatcherConfig {
            tick_secs: 0,
            fetch_timeout_secs: 0,
            retry: RetryConfig::default(),
        };
        assert_eq!(config.tick(), Duration::from_secs(1));
        assert_eq!(config.fetch_timeout(), Duration::from_secs(1));
    }
}
