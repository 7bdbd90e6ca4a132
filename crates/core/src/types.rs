//! Core data model: chokepoints, series keys, and observations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// A tracked maritime strait or canal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chokepoint {
    /// Stable identifier (e.g., "bab-el-mandeb")
    pub id: String,
    /// Human-readable name (e.g., "Bab El Mandeb")
    pub name: String,
}

impl Chokepoint {
    /// Creates a chokepoint with an explicit display name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Creates a chokepoint whose display name is derived from the id.
    ///
    /// Dashes become spaces and each word is capitalized.
    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        let name = id
            .split(['-', '_'])
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        Self { id, name }
    }
}

/// Identifies one time series: a (chokepoint, variable) pair.
///
/// This is the unit of mutual exclusion and ordering throughout the system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub chokepoint: String,
    pub variable: String,
}

impl SeriesKey {
    pub fn new(chokepoint: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            chokepoint: chokepoint.into(),
            variable: variable.into(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chokepoint, self.variable)
    }
}

/// The declared type of a variable's values. Fixed per variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Enum,
    Number,
    Boolean,
    Datetime,
    Array,
}

impl ValueType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Enum => "enum",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Datetime => "datetime",
            ValueType::Array => "array",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "enum" | "string" => Ok(ValueType::Enum),
            "number" | "integer" | "float" => Ok(ValueType::Number),
            "boolean" | "bool" => Ok(ValueType::Boolean),
            "datetime" | "date" => Ok(ValueType::Datetime),
            "array" => Ok(ValueType::Array),
            other => Err(ConfigError::UnknownDataType(other.to_string())),
        }
    }
}

/// A typed observation value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ObservationValue {
    Enum(String),
    Number(f64),
    Boolean(bool),
    Datetime(DateTime<Utc>),
    Array(Vec<serde_json::Value>),
}

impl ObservationValue {
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            ObservationValue::Enum(_) => ValueType::Enum,
            ObservationValue::Number(_) => ValueType::Number,
            ObservationValue::Boolean(_) => ValueType::Boolean,
            ObservationValue::Datetime(_) => ValueType::Datetime,
            ObservationValue::Array(_) => ValueType::Array,
        }
    }

    /// Returns the numeric value, if this is a number.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ObservationValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns a label for categorical comparison.
    ///
    /// Enums yield their variant text, booleans "true"/"false".
    /// Numbers, datetimes, and arrays are not categorical.
    #[must_use]
    pub fn as_label(&self) -> Option<String> {
        match self {
            ObservationValue::Enum(s) => Some(s.trim().to_lowercase()),
            ObservationValue::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Encodes the inner value for flat storage (CSV cell).
    #[must_use]
    pub fn to_cell(&self) -> String {
        match self {
            ObservationValue::Enum(s) => s.clone(),
            ObservationValue::Number(n) => n.to_string(),
            ObservationValue::Boolean(b) => b.to_string(),
            ObservationValue::Datetime(dt) => dt.to_rfc3339(),
            ObservationValue::Array(items) => {
                serde_json::Value::Array(items.clone()).to_string()
            }
        }
    }

    /// Decodes a flat storage cell for the given type.
    ///
    /// # Errors
    /// Returns a description of the parse failure.
    pub fn from_cell(value_type: ValueType, cell: &str) -> Result<Self, String> {
        match value_type {
            ValueType::Enum => Ok(ObservationValue::Enum(cell.to_string())),
            ValueType::Number => cell
                .parse::<f64>()
                .map(ObservationValue::Number)
                .map_err(|e| format!("invalid number '{cell}': {e}")),
            ValueType::Boolean => cell
                .parse::<bool>()
                .map(ObservationValue::Boolean)
                .map_err(|e| format!("invalid boolean '{cell}': {e}")),
            ValueType::Datetime => DateTime::parse_from_rfc3339(cell)
                .map(|dt| ObservationValue::Datetime(dt.with_timezone(&Utc)))
                .map_err(|e| format!("invalid datetime '{cell}': {e}")),
            ValueType::Array => match serde_json::from_str::<serde_json::Value>(cell) {
                Ok(serde_json::Value::Array(items)) => Ok(ObservationValue::Array(items)),
                Ok(other) => Err(format!("expected JSON array, got {other}")),
                Err(e) => Err(format!("invalid array '{cell}': {e}")),
            },
        }
    }
}

impl fmt::Display for ObservationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_cell())
    }
}

/// One measurement of one series at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub key: SeriesKey,
    pub timestamp: DateTime<Utc>,
    pub value: ObservationValue,
}

impl Observation {
    pub fn new(key: SeriesKey, timestamp: DateTime<Utc>, value: ObservationValue) -> Self {
        Self {
            key,
            timestamp,
            value,
        }
    }

    #[must_use]
    pub fn value_type(&self) -> ValueType {
        self.value.value_type()
    }
}

/// A half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}
