//! Stateful signal evaluation.
//!
//! The engine consumes newly appended observations, evaluates every matching
//! rule against the per (chokepoint, signal type) state, and returns the
//! events produced. Observations at or before a state's `last_processed`
//! timestamp are skipped, which makes replay after a restart emit nothing new.

use std::collections::HashMap;
use tracing::{debug, info, warn};

use chokepoint_core::{Observation, SignalEvent, StorageError};

use crate::registry::SignalRegistry;
use crate::rules::Transition;
use crate::state::{SignalState, SignalStatePersistence, StateKey};

/// Counters for one `process` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub evaluated: usize,
    pub skipped_replay: usize,
    pub errors: usize,
    pub fired: usize,
    pub rearmed: usize,
}

pub struct SignalEngine {
    registry: SignalRegistry,
    states: HashMap<StateKey, SignalState>,
    persistence: Option<SignalStatePersistence>,
    dirty: bool,
}

impl SignalEngine {
    /// Creates an engine with empty, unpersisted state.
    #[must_use]
    pub fn new(registry: SignalRegistry) -> Self {
        Self {
            registry,
            states: HashMap::new(),
            persistence: None,
            dirty: false,
        }
    }

    /// Creates an engine whose state is loaded from and saved to `persistence`.
    #[must_use]
    pub fn with_persistence(registry: SignalRegistry, persistence: SignalStatePersistence) -> Self {
        let states = persistence.load();
        Self {
            registry,
            states,
            persistence: Some(persistence),
            dirty: false,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &SignalRegistry {
        &self.registry
    }

    #[must_use]
    pub fn state(&self, key: &StateKey) -> Option<&SignalState> {
        self.states.get(key)
    }

    /// Evaluates `observations` in timestamp order.
    pub fn process(&mut self, observations: &[Observation]) -> Vec<SignalEvent> {
        self.process_with_stats(observations).0
    }

    /// Like [`process`](Self::process), also returning counters.
    pub fn process_with_stats(
        &mut self,
        observations: &[Observation],
    ) -> (Vec<SignalEvent>, EngineStats) {
        let mut ordered: Vec<&Observation> = observations.iter().collect();
        ordered.sort_by_key(|obs| obs.timestamp);

        let mut events = Vec::new();
        let mut stats = EngineStats::default();

        for obs in ordered {
            for rule in self.registry.matching(&obs.key) {
                let state_key = StateKey::new(obs.key.chokepoint.clone(), rule.signal_type);
                let state = self.states.entry(state_key).or_default();

                if state.has_processed(obs.timestamp) {
                    stats.skipped_replay += 1;
                    continue;
                }
                stats.evaluated += 1;

                match rule.evaluate(state, obs) {
                    Ok((next, transition)) => {
                        *state = next;
                        state.last_value = Some(obs.value.clone());
                        match transition {
                            Some(Transition::Fired) => {
                                stats.fired += 1;
                                info!(
                                    signal = %rule.signal_type,
                                    series = %obs.key,
                                    timestamp = %obs.timestamp,
                                    value = %obs.value,
                                    "Signal fired"
                                );
                                events.push(SignalEvent::from_observation(rule.signal_type, obs));
                            }
                            Some(Transition::Rearmed) => {
                                stats.rearmed += 1;
                                debug!(
                                    signal = %rule.signal_type,
                                    series = %obs.key,
                                    timestamp = %obs.timestamp,
                                    "Signal re-armed"
                                );
                            }
                            None => {}
                        }
                    }
                    Err(e) => {
                        stats.errors += 1;
                        warn!(
                            signal = %rule.signal_type,
                            series = %obs.key,
                            timestamp = %obs.timestamp,
                            error = %e,
                            "Signal evaluation failed, skipping point"
                        );
                    }
                }
                state.last_processed = Some(obs.timestamp);
                self.dirty = true;
            }
        }

        (events, stats)
    }

    /// Writes state to disk if anything changed since the last save.
    ///
    /// # Errors
    /// Returns error if the state file cannot be written.
    pub fn save(&mut self) -> Result<(), StorageError> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(persistence) = &self.persistence {
            persistence.save(&self.states)?;
        }
        self.dirty = false;
        Ok(())
    }
}

impl std::fmt::Debug for SignalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalEngine")
            .field("rules", &self.registry.names())
            .field("states", &self.states.len())
            .finish()
    }
}
