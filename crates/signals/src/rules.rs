//! Signal rules: a closed set of rule categories sharing one evaluation contract.
//!
//! Every category follows the same arm/fire/re-arm cycle. A rule fires only
//! while armed and disarms when it does; it re-arms once its triggering
//! condition no longer holds. This yields exactly one event per qualifying
//! transition regardless of how long the value stays on the triggered side.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use chokepoint_core::{
    ConfigError, Observation, ObservationValue, SeriesKey, SignalEvaluationError, SignalType,
};

use crate::state::SignalState;

/// A predicate over one observation value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// Numeric value strictly above `threshold`.
    Above { threshold: f64 },
    /// Numeric value strictly below `threshold`.
    Below { threshold: f64 },
    /// Categorical value equals `value` (case-insensitive).
    Equals { value: String },
    /// Categorical value is one of `values` (case-insensitive).
    OneOf { values: Vec<String> },
    /// True boolean, non-empty array, non-zero number, or an enum other
    /// than "", "none", "false".
    Truthy,
}

impl Condition {
    /// Evaluates the condition.
    ///
    /// # Errors
    /// Returns `SignalEvaluationError` if the value type does not suit the
    /// condition or a number is not finite.
    pub fn holds(&self, value: &ObservationValue) -> Result<bool, SignalEvaluationError> {
        match self {
            Condition::Above { threshold } => Ok(finite_number(value)? > *threshold),
            Condition::Below { threshold } => Ok(finite_number(value)? < *threshold),
            Condition::Equals { value: expected } => {
                Ok(label(value)? == expected.trim().to_lowercase())
            }
            Condition::OneOf { values } => {
                let actual = label(value)?;
                Ok(values.iter().any(|v| v.trim().to_lowercase() == actual))
            }
            Condition::Truthy => Ok(match value {
                ObservationValue::Boolean(b) => *b,
                ObservationValue::Array(items) => !items.is_empty(),
                ObservationValue::Number(n) => finite(*n)? != 0.0,
                ObservationValue::Enum(s) => {
                    !matches!(s.trim().to_lowercase().as_str(), "" | "none" | "false")
                }
                ObservationValue::Datetime(_) => true,
            }),
        }
    }
}

/// Which relative changes count for a rate rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateDirection {
    #[default]
    Up,
    Down,
    Either,
}

/// Category-specific rule parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum RuleKind {
    /// Fires on the observation where `condition` becomes true.
    Edge { condition: Condition },
    /// Fires when the value reaches `threshold`; re-arms below
    /// `threshold - hysteresis`.
    Threshold { threshold: f64, hysteresis: f64 },
    /// Fires when the change relative to the value `lookback` observations
    /// earlier reaches `pct` percent.
    Rate {
        lookback: usize,
        pct: f64,
        #[serde(default)]
        direction: RateDirection,
    },
    /// Fires once `condition` has held continuously for `min_duration_secs`.
    Persistence {
        condition: Condition,
        min_duration_secs: i64,
    },
}

/// What an evaluation did to the armed flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Fired,
    Rearmed,
}

/// Static configuration of one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRule {
    pub signal_type: SignalType,
    /// Variable whose observations feed this rule
    pub variable: String,
    /// Restricts the rule to one chokepoint; `None` matches all
    #[serde(default)]
    pub chokepoint: Option<String>,
    #[serde(flatten)]
    pub kind: RuleKind,
}

impl SignalRule {
    pub fn new(signal_type: SignalType, variable: impl Into<String>, kind: RuleKind) -> Self {
        Self {
            signal_type,
            variable: variable.into(),
            chokepoint: None,
            kind,
        }
    }

    /// Restricts the rule to one chokepoint.
    #[must_use]
    pub fn for_chokepoint(mut self, chokepoint: impl Into<String>) -> Self {
        self.chokepoint = Some(chokepoint.into());
        self
    }

    #[must_use]
    pub fn matches(&self, key: &SeriesKey) -> bool {
        self.variable == key.variable
            && self
                .chokepoint
                .as_ref()
                .map_or(true, |cp| cp == &key.chokepoint)
    }

    /// Rejects parameters that can never evaluate sensibly.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` describing the bad parameter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(format!("{}: {msg}", self.signal_type)));
        match &self.kind {
            RuleKind::Threshold {
                threshold,
                hysteresis,
            } => {
                if !threshold.is_finite() || !hysteresis.is_finite() || *hysteresis < 0.0 {
                    return invalid("threshold must be finite and hysteresis non-negative");
                }
            }
            RuleKind::Rate { lookback, pct, .. } => {
                if *lookback == 0 {
                    return invalid("rate lookback must be at least 1");
                }
                if !pct.is_finite() || *pct <= 0.0 {
                    return invalid("rate pct must be positive");
                }
            }
            RuleKind::Persistence {
                min_duration_secs, ..
            } => {
                if *min_duration_secs < 0 {
                    return invalid("persistence duration must be non-negative");
                }
            }
            RuleKind::Edge { .. } => {}
        }
        Ok(())
    }

    /// Evaluates this rule against one observation.
    ///
    /// Returns the updated state and the transition, if any. The caller is
    /// responsible for recording `last_value`/`last_processed`.
    ///
    /// # Errors
    /// Returns `SignalEvaluationError` if the value cannot be evaluated; the
    /// input state is then left as it was.
    pub fn evaluate(
        &self,
        state: &SignalState,
        obs: &Observation,
    ) -> Result<(SignalState, Option<Transition>), SignalEvaluationError> {
        let mut next = state.clone();
        let transition = match &self.kind {
            RuleKind::Edge { condition } => {
                let active = condition.holds(&obs.value)?;
                arm_cycle(&mut next, active)
            }
            RuleKind::Threshold {
                threshold,
                hysteresis,
            } => {
                let value = finite_number(&obs.value)?;
                if next.armed && value >= *threshold {
                    next.armed = false;
                    Some(Transition::Fired)
                } else if !next.armed && value < threshold - hysteresis {
                    next.armed = true;
                    Some(Transition::Rearmed)
                } else {
                    None
                }
            }
            RuleKind::Rate {
                lookback,
                pct,
                direction,
            } => {
                let value = finite_number(&obs.value)?;
                next.window.push_back(value);
                while next.window.len() > lookback + 1 {
                    next.window.pop_front();
                }
                match next.window.front() {
                    Some(&base) if next.window.len() == lookback + 1 && base != 0.0 => {
                        let change = (value - base) / base.abs() * 100.0;
                        let active = match direction {
                            RateDirection::Up => change >= *pct,
                            RateDirection::Down => change <= -pct,
                            RateDirection::Either => change.abs() >= *pct,
                        };
                        arm_cycle(&mut next, active)
                    }
                    _ => None,
                }
            }
            RuleKind::Persistence {
                condition,
                min_duration_secs,
            } => {
                if condition.holds(&obs.value)? {
                    let since = *next.first_true.get_or_insert(obs.timestamp);
                    if next.armed && obs.timestamp - since >= Duration::seconds(*min_duration_secs)
                    {
                        next.armed = false;
                        Some(Transition::Fired)
                    } else {
                        None
                    }
                } else {
                    next.first_true = None;
                    arm_cycle(&mut next, false)
                }
            }
        };
        Ok((next, transition))
    }
}

/// Fires on an armed active condition, re-arms on a disarmed inactive one.
fn arm_cycle(state: &mut SignalState, active: bool) -> Option<Transition> {
    match (state.armed, active) {
        (true, true) => {
            state.armed = false;
            Some(Transition::Fired)
        }
        (false, false) => {
            state.armed = true;
            Some(Transition::Rearmed)
        }
        _ => None,
    }
}

fn finite(n: f64) -> Result<f64, SignalEvaluationError> {
    if n.is_finite() {
        Ok(n)
    } else {
        Err(SignalEvaluationError::OutOfRange(n.to_string()))
    }
}

fn finite_number(value: &ObservationValue) -> Result<f64, SignalEvaluationError> {
    match value {
        ObservationValue::Number(n) => finite(*n),
        other => Err(SignalEvaluationError::TypeMismatch {
            expected: "number".to_string(),
            actual: other.value_type().to_string(),
        }),
    }
}

fn label(value: &ObservationValue) -> Result<String, SignalEvaluationError> {
    value
        .as_label()
        .ok_or_else(|| SignalEvaluationError::TypeMismatch {
            expected: "enum or boolean".to_string(),
            actual: value.value_type().to_string(),
        })
}
