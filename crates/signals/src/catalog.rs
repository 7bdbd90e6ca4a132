//! Built-in rule catalog and rule-file loading.

use std::fs;
use std::path::Path;

use chokepoint_core::{ConfigError, SignalType};

use crate::registry::SignalRegistry;
use crate::rules::{Condition, RateDirection, RuleKind, SignalRule};

const HOUR: i64 = 3600;

/// The default rule for every signal type.
///
/// Thresholds and persistence durations are configuration; these are
/// starting values meant to be overridden by a rules file.
#[must_use]
pub fn default_rules() -> Vec<SignalRule> {
    vec![
        SignalRule::new(
            SignalType::ChokepointClosed,
            "transit_status",
            RuleKind::Edge {
                condition: Condition::Equals {
                    value: "closed".to_string(),
                },
            },
        ),
        SignalRule::new(
            SignalType::ChokepointRestricted,
            "transit_status",
            RuleKind::Edge {
                condition: Condition::Equals {
                    value: "restricted".to_string(),
                },
            },
        ),
        SignalRule::new(
            SignalType::VesselTypeBanned,
            "vessel_type_banned",
            RuleKind::Edge {
                condition: Condition::Truthy,
            },
        ),
        SignalRule::new(
            SignalType::CongestionSpike,
            "wait_time_hours",
            RuleKind::Threshold {
                threshold: 48.0,
                hysteresis: 12.0,
            },
        ),
        SignalRule::new(
            SignalType::WarRiskSurge,
            "war_risk_premium",
            RuleKind::Threshold {
                threshold: 0.5,
                hysteresis: 0.1,
            },
        ),
        SignalRule::new(
            SignalType::DelayAcceleration,
            "wait_time_hours",
            RuleKind::Rate {
                lookback: 3,
                pct: 50.0,
                direction: RateDirection::Up,
            },
        ),
        SignalRule::new(
            SignalType::PersistentCongestion,
            "wait_time_hours",
            RuleKind::Persistence {
                condition: Condition::Above { threshold: 24.0 },
                min_duration_secs: 72 * HOUR,
            },
        ),
        SignalRule::new(
            SignalType::IncidentUnresolved,
            "incident_status",
            RuleKind::Persistence {
                condition: Condition::OneOf {
                    values: vec![
                        "active".to_string(),
                        "ongoing".to_string(),
                        "unresolved".to_string(),
                    ],
                },
                min_duration_secs: 48 * HOUR,
            },
        ),
        SignalRule::new(
            SignalType::OperationalUncertaintyHigh,
            "operational_uncertainty",
            RuleKind::Persistence {
                condition: Condition::Above { threshold: 0.7 },
                min_duration_secs: 24 * HOUR,
            },
        ),
    ]
}

/// Loads a JSON array of rules.
///
/// # Errors
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_rules(path: &Path) -> Result<Vec<SignalRule>, ConfigError> {
    let display = path.display().to_string();
    let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: display.clone(),
        source,
    })?;
    serde_json::from_str(&json).map_err(|e| ConfigError::Parse {
        path: display,
        message: e.to_string(),
    })
}

/// Builds the registry from `rules_file`, or the built-in catalog if none.
///
/// # Errors
/// Returns `ConfigError` if the file is unusable or a rule is invalid.
pub fn build_registry(rules_file: Option<&Path>) -> Result<SignalRegistry, ConfigError> {
    let rules = match rules_file {
        Some(path) => load_rules(path)?,
        None => default_rules(),
    };
    SignalRegistry::from_rules(rules)
}
