//! ArcGIS feature-query response types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of a `FeatureServer/0/query` response with `f=json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub features: Vec<Feature>,

    /// ArcGIS reports query failures in a 200 response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<QueryError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Feature {
    /// Feature date in epoch milliseconds.
    #[must_use]
    pub fn date_ms(&self) -> Option<i64> {
        self.attributes.get("date").and_then(Value::as_i64)
    }

    #[must_use]
    pub fn number(&self, attribute: &str) -> Option<f64> {
        self.attributes.get(attribute).and_then(Value::as_f64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}
