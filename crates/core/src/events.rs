use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::types::{Observation, ObservationValue, SeriesKey};

/// The fixed catalog of signal types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    ChokepointClosed,
    ChokepointRestricted,
    VesselTypeBanned,
    CongestionSpike,
    WarRiskSurge,
    DelayAcceleration,
    PersistentCongestion,
    IncidentUnresolved,
    OperationalUncertaintyHigh,
}

impl SignalType {
    pub const ALL: [SignalType; 9] = [
        SignalType::ChokepointClosed,
        SignalType::ChokepointRestricted,
        SignalType::VesselTypeBanned,
        SignalType::CongestionSpike,
        SignalType::WarRiskSurge,
        SignalType::DelayAcceleration,
        SignalType::PersistentCongestion,
        SignalType::IncidentUnresolved,
        SignalType::OperationalUncertaintyHigh,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::ChokepointClosed => "CHOKEPOINT_CLOSED",
            SignalType::ChokepointRestricted => "CHOKEPOINT_RESTRICTED",
            SignalType::VesselTypeBanned => "VESSEL_TYPE_BANNED",
            SignalType::CongestionSpike => "CONGESTION_SPIKE",
            SignalType::WarRiskSurge => "WAR_RISK_SURGE",
            SignalType::DelayAcceleration => "DELAY_ACCELERATION",
            SignalType::PersistentCongestion => "PERSISTENT_CONGESTION",
            SignalType::IncidentUnresolved => "INCIDENT_UNRESOLVED",
            SignalType::OperationalUncertaintyHigh => "OPERATIONAL_UNCERTAINTY_HIGH",
        }
    }

    /// Impact tags statically attached to this signal type.
    #[must_use]
    pub fn impact_hints(&self) -> &'static [ImpactHint] {
        use ImpactHint::*;
        match self {
            SignalType::ChokepointClosed => &[RouteDiversion, DelayUp, CostUp, CapacityDown],
            SignalType::ChokepointRestricted => &[DelayUp, CapacityDown],
            SignalType::VesselTypeBanned => &[RouteDiversion, CapacityDown],
            SignalType::CongestionSpike => &[DelayUp],
            SignalType::WarRiskSurge => &[CostUp, InsuranceUp],
            SignalType::DelayAcceleration => &[DelayUp],
            SignalType::PersistentCongestion => &[DelayUp, CapacityDown],
            SignalType::IncidentUnresolved => &[DelayUp, RiskUp],
            SignalType::OperationalUncertaintyHigh => &[RiskUp],
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        SignalType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown signal type '{s}'")))
    }
}

/// Declarative downstream impact tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactHint {
    DelayUp,
    CostUp,
    RouteDiversion,
    CapacityDown,
    InsuranceUp,
    RiskUp,
}

impl ImpactHint {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactHint::DelayUp => "delay_up",
            ImpactHint::CostUp => "cost_up",
            ImpactHint::RouteDiversion => "route_diversion",
            ImpactHint::CapacityDown => "capacity_down",
            ImpactHint::InsuranceUp => "insurance_up",
            ImpactHint::RiskUp => "risk_up",
        }
    }
}

/// Reference to the observation that triggered an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRef {
    pub key: SeriesKey,
    pub timestamp: DateTime<Utc>,
    pub value: ObservationValue,
}

impl From<&Observation> for ObservationRef {
    fn from(obs: &Observation) -> Self {
        Self {
            key: obs.key.clone(),
            timestamp: obs.timestamp,
            value: obs.value.clone(),
        }
    }
}

/// A single qualifying transition. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub chokepoint: String,
    pub signal_type: SignalType,
    pub timestamp: DateTime<Utc>,
    pub trigger: ObservationRef,
    pub impact_hints: Vec<ImpactHint>,
}

impl SignalEvent {
    /// Builds an event for `signal_type` triggered by `obs`.
    pub fn from_observation(signal_type: SignalType, obs: &Observation) -> Self {
        Self {
            chokepoint: obs.key.chokepoint.clone(),
            signal_type,
            timestamp: obs.timestamp,
            trigger: ObservationRef::from(obs),
            impact_hints: signal_type.impact_hints().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_signal_type_round_trip_names() {
        for t in SignalType::ALL {
            assert_eq!(t.as_str().parse::<SignalType>().unwrap(), t);
        }
        assert!("SUNNY_DAY".parse::<SignalType>().is_err());
    }

    #[test]
    fn test_signal_type_serde_matches_display() {
        let json = serde_json::to_string(&SignalType::WarRiskSurge).unwrap();
        assert_eq!(json, "\"WAR_RISK_SURGE\"");
        let hint = serde_json::to_string(&ImpactHint::RouteDiversion).unwrap();
        assert_eq!(hint, "\"route_diversion\"");
    }

    #[test]
    fn test_event_carries_static_hints() {
        let obs = Observation::new(
            SeriesKey::new("suez-canal", "transit_status"),
            Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
            ObservationValue::Enum("closed".to_string()),
        );
        let event = SignalEvent::from_observation(SignalType::ChokepointClosed, &obs);

        assert_eq!(event.chokepoint, "suez-canal");
        assert_eq!(event.timestamp, obs.timestamp);
        assert_eq!(event.trigger.key, obs.key);
        assert!(event.impact_hints.contains(&ImpactHint::RouteDiversion));
        assert!(event.impact_hints.contains(&ImpactHint::DelayUp));
    }
}
