//! Rule registry for the signal engine.
//!
//! Holds the static rule set and answers which rules an observation feeds.

use chokepoint_core::{ConfigError, SeriesKey, SignalType};

use crate::rules::SignalRule;

/// Ordered, validated collection of signal rules.
///
/// Rules are not mutated at runtime. Two rules with the same signal type may
/// not apply to the same chokepoint, since they would share evaluation state.
#[derive(Debug, Clone, Default)]
pub struct SignalRegistry {
    rules: Vec<SignalRule>,
}

impl SignalRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a rule list.
    ///
    /// # Errors
    /// Returns `ConfigError` if any rule is invalid or two rules collide.
    pub fn from_rules(rules: impl IntoIterator<Item = SignalRule>) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for rule in rules {
            registry.register(rule)?;
        }
        Ok(registry)
    }

    /// Registers a rule.
    ///
    /// # Errors
    /// Returns `ConfigError` if the rule is invalid or overlaps an existing
    /// rule of the same signal type.
    pub fn register(&mut self, rule: SignalRule) -> Result<(), ConfigError> {
        rule.validate()?;
        let overlaps = self.rules.iter().any(|existing| {
            existing.signal_type == rule.signal_type
                && match (&existing.chokepoint, &rule.chokepoint) {
                    (Some(a), Some(b)) => a == b,
                    _ => true,
                }
        });
        if overlaps {
            return Err(ConfigError::Invalid(format!(
                "signal {} defined more than once for the same chokepoint",
                rule.signal_type
            )));
        }
        self.rules.push(rule);
        Ok(())
    }

    /// Rules fed by observations of `key`, in registration order.
    pub fn matching<'a>(&'a self, key: &'a SeriesKey) -> impl Iterator<Item = &'a SignalRule> {
        self.rules.iter().filter(move |rule| rule.matches(key))
    }

    /// Returns true if any rule targets `signal_type`.
    #[must_use]
    pub fn contains(&self, signal_type: SignalType) -> bool {
        self.rules.iter().any(|r| r.signal_type == signal_type)
    }

    /// Returns the signal types of all rules.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.signal_type.as_str()).collect()
    }

    #[must_use]
    pub fn rules(&self) -> &[SignalRule] {
        &self.rules
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Condition, RuleKind};

    fn closed_rule() -> SignalRule {
        SignalRule::new(
            SignalType::ChokepointClosed,
            "transit_status",
            RuleKind::Edge {
                condition: Condition::Equals {
                    value: "closed".to_string(),
                },
            },
        )
    }

    #[test]
    fn test_register_and_match() {
        let registry = SignalRegistry::from_rules(vec![closed_rule()]).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(SignalType::ChokepointClosed));

        let key = SeriesKey::new("suez-canal", "transit_status");
        assert_eq!(registry.matching(&key).count(), 1);
        let other = SeriesKey::new("suez-canal", "wait_time_hours");
        assert_eq!(registry.matching(&other).count(), 0);
    }

    #[test]
    fn test_rejects_overlapping_signal_type() {
        let mut registry = SignalRegistry::new();
        registry.register(closed_rule()).unwrap();
        assert!(registry
            .register(closed_rule().for_chokepoint("suez-canal"))
            .is_err());
    }

    #[test]
    fn test_allows_same_type_on_distinct_chokepoints() {
        let mut registry = SignalRegistry::new();
        registry
            .register(closed_rule().for_chokepoint("suez-canal"))
            .unwrap();
        registry
            .register(closed_rule().for_chokepoint("panama-canal"))
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.names().iter().all(|n| *n == "CHOKEPOINT_CLOSED"));
    }
}
