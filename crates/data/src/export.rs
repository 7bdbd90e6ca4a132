//! JSON export and summary statistics for stored series.
//!
//! Two export layouts are supported:
//! - `records`: an ordered list of `{timestamp, value}` rows with the
//!   series date range
//! - `timeseries`: a map from RFC 3339 timestamp to value

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

use chokepoint_core::{Observation, ObservationValue, SeriesKey, SeriesStore, StorageError};

/// Layout of an exported series document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Records,
    Timeseries,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Records => write!(f, "records"),
            ExportFormat::Timeseries => write!(f, "timeseries"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "records" => Ok(ExportFormat::Records),
            "timeseries" => Ok(ExportFormat::Timeseries),
            other => Err(format!("unknown export format '{other}'")),
        }
    }
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Plain JSON for a value, without the storage type tag.
///
/// Non-finite numbers have no JSON form and export as null.
#[must_use]
pub fn value_to_json(value: &ObservationValue) -> Value {
    match value {
        ObservationValue::Enum(s) => Value::String(s.clone()),
        ObservationValue::Number(n) => json!(n),
        ObservationValue::Boolean(b) => Value::Bool(*b),
        ObservationValue::Datetime(dt) => Value::String(format_timestamp(*dt)),
        ObservationValue::Array(items) => Value::Array(items.clone()),
    }
}

/// Builds the export document for one series.
///
/// `observations` must be ordered by timestamp, as `query_range` returns them.
#[must_use]
pub fn export_document(
    key: &SeriesKey,
    observations: &[Observation],
    format: ExportFormat,
    exported_at: DateTime<Utc>,
) -> Value {
    let mut doc = Map::new();
    doc.insert("chokepoint".into(), json!(key.chokepoint));
    doc.insert("variable".into(), json!(key.variable));
    doc.insert("total_records".into(), json!(observations.len()));

    match format {
        ExportFormat::Records => {
            let date_range = match (observations.first(), observations.last()) {
                (Some(first), Some(last)) => json!({
                    "start": format_timestamp(first.timestamp),
                    "end": format_timestamp(last.timestamp),
                }),
                _ => Value::Null,
            };
            doc.insert("date_range".into(), date_range);
            doc.insert("exported_at".into(), json!(format_timestamp(exported_at)));
            let data: Vec<Value> = observations
                .iter()
                .map(|o| {
                    json!({
                        "timestamp": format_timestamp(o.timestamp),
                        "value": value_to_json(&o.value),
                    })
                })
                .collect();
            doc.insert("data".into(), Value::Array(data));
        }
        ExportFormat::Timeseries => {
            doc.insert("exported_at".into(), json!(format_timestamp(exported_at)));
            let series: Map<String, Value> = observations
                .iter()
                .map(|o| (format_timestamp(o.timestamp), value_to_json(&o.value)))
                .collect();
            doc.insert("timeseries".into(), Value::Object(series));
        }
    }

    Value::Object(doc)
}

/// Reads every stored observation of a series, oldest first.
///
/// # Errors
/// Returns an error if the store cannot be read.
pub fn load_series(
    store: &dyn SeriesStore,
    key: &SeriesKey,
) -> Result<Vec<Observation>, StorageError> {
    match (store.earliest(key)?, store.latest(key)?) {
        (Some(first), Some(last)) => store.query_range(
            key,
            first.timestamp,
            last.timestamp + Duration::seconds(1),
        ),
        _ => Ok(Vec::new()),
    }
}

/// Summary statistics over the number observations of a series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesStats {
    pub count: usize,
    pub total: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Sample standard deviation; undefined below two values.
    pub std_dev: Option<f64>,
}

impl SeriesStats {
    /// Computes stats over the finite numbers in `observations`.
    ///
    /// Returns `None` when the series holds no numbers.
    #[must_use]
    pub fn from_observations(observations: &[Observation]) -> Option<Self> {
        let values: Vec<f64> = observations
            .iter()
            .filter_map(|o| o.value.as_f64())
            .filter(|v| v.is_finite())
            .collect();
        if values.is_empty() {
            return None;
        }

        let count = values.len();
        let total: f64 = values.iter().sum();
        let mean = total / count as f64;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let std_dev = (count > 1).then(|| {
            let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            (sum_sq / (count - 1) as f64).sqrt()
        });

        Some(Self {
            count,
            total,
            mean,
            min,
            max,
            std_dev,
        })
    }
}
