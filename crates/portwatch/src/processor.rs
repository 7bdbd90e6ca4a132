//! Turns PortWatch features into daily observations.

use chrono::{DateTime, Utc};
use tracing::debug;

use chokepoint_core::{Observation, ObservationValue, ProcessError, Processor, RawPayload};

use crate::types::QueryResponse;

/// Attribute carrying the value of `variable`.
///
/// `vessel_arrivals` maps to the total count; per-type variables map by
/// suffix (e.g. `vessel_arrivals_tanker` to `n_tanker`).
#[must_use]
pub fn attribute_for(variable: &str) -> Option<&'static str> {
    const BY_SUFFIX: [(&str, &str); 5] = [
        ("_container", "n_container"),
        ("_dry_bulk", "n_dry_bulk"),
        ("_general_cargo", "n_general_cargo"),
        ("_roro", "n_roro"),
        ("_tanker", "n_tanker"),
    ];

    if variable == "vessel_arrivals" {
        return Some("n_total");
    }
    BY_SUFFIX
        .iter()
        .find(|(suffix, _)| variable.ends_with(suffix))
        .map(|(_, attribute)| *attribute)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PortWatchProcessor;

impl PortWatchProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Processor for PortWatchProcessor {
    fn transform(&self, payload: &RawPayload) -> Result<Vec<Observation>, ProcessError> {
        let attribute = attribute_for(&payload.key.variable).ok_or_else(|| {
            ProcessError::Malformed(format!(
                "no PortWatch attribute for variable '{}'",
                payload.key.variable
            ))
        })?;
        let response: QueryResponse = serde_json::from_value(payload.body.clone())
            .map_err(|e| ProcessError::Malformed(e.to_string()))?;

        let mut skipped = 0usize;
        let mut observations: Vec<Observation> = response
            .features
            .iter()
            .filter_map(|feature| {
                let day = feature
                    .date_ms()
                    .and_then(DateTime::<Utc>::from_timestamp_millis)
                    .and_then(|dt| dt.date_naive().and_hms_opt(0, 0, 0))
                    .map(|midnight| midnight.and_utc());
                match (day, feature.number(attribute)) {
                    (Some(day), Some(value)) => Some(Observation::new(
                        payload.key.clone(),
                        day,
                        ObservationValue::Number(value),
                    )),
                    _ => {
                        skipped += 1;
                        None
                    }
                }
            })
            .collect();
        observations.sort_by_key(|o| o.timestamp);
        observations.dedup_by_key(|o| o.timestamp);

        debug!(
            series = %payload.key,
            observations = observations.len(),
            skipped,
            "Processed PortWatch features"
        );
        Ok(observations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chokepoint_core::SeriesKey;
    use chrono::TimeZone;
    use serde_json::json;

    fn payload(variable: &str, body: serde_json::Value) -> RawPayload {
        RawPayload::new(SeriesKey::new("suez-canal", variable), body)
    }

    #[test]
    fn test_attribute_mapping() {
        assert_eq!(attribute_for("vessel_arrivals"), Some("n_total"));
        assert_eq!(attribute_for("vessel_arrivals_tanker"), Some("n_tanker"));
        assert_eq!(attribute_for("vessel_arrivals_dry_bulk"), Some("n_dry_bulk"));
        assert_eq!(attribute_for("vessel_arrivals_general_cargo"), Some("n_general_cargo"));
        assert_eq!(attribute_for("transit_status"), None);
    }

    #[test]
    fn test_features_become_midnight_observations() {
        // 2026-01-25 14:00 UTC
        let ms = Utc.with_ymd_and_hms(2026, 1, 25, 14, 0, 0).unwrap().timestamp_millis();
        let earlier = Utc.with_ymd_and_hms(2026, 1, 24, 0, 0, 0).unwrap().timestamp_millis();
        let body = json!({
            "features": [
                {"attributes": {"date": ms, "n_total": 41, "n_tanker": 9}},
                {"attributes": {"date": earlier, "n_total": 38, "n_tanker": 7}}
            ]
        });

        let observations = PortWatchProcessor
            .transform(&payload("vessel_arrivals_tanker", body))
            .unwrap();

        assert_eq!(observations.len(), 2);
        assert_eq!(
            observations[0].timestamp,
            Utc.with_ymd_and_hms(2026, 1, 24, 0, 0, 0).unwrap()
        );
        assert_eq!(
            observations[1].timestamp,
            Utc.with_ymd_and_hms(2026, 1, 25, 0, 0, 0).unwrap()
        );
        assert_eq!(observations[1].value, ObservationValue::Number(9.0));
    }

    #[test]
    fn test_features_without_date_or_value_are_skipped() {
        let ms = Utc.with_ymd_and_hms(2026, 1, 25, 0, 0, 0).unwrap().timestamp_millis();
        let body = json!({
            "features": [
                {"attributes": {"n_total": 41}},
                {"attributes": {"date": ms, "n_total": null}},
                {"attributes": {"date": ms, "n_total": 12}}
            ]
        });
        let observations = PortWatchProcessor
            .transform(&payload("vessel_arrivals", body))
            .unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].value, ObservationValue::Number(12.0));
    }

    #[test]
    fn test_empty_response_yields_nothing() {
        let observations = PortWatchProcessor
            .transform(&payload("vessel_arrivals", json!({})))
            .unwrap();
        assert!(observations.is_empty());
    }

    #[test]
    fn test_unknown_variable_is_rejected() {
        let err = PortWatchProcessor
            .transform(&payload("war_risk_premium", json!({"features": []})))
            .unwrap_err();
        assert!(matches!(err, ProcessError::Malformed(_)));
    }
}
