//! Per (chokepoint, signal type) evaluation state and its persistence.
//!
//! State is created lazily on the first observation that reaches a rule and
//! is never deleted: re-arming depends on the history it carries. It is saved
//! to a JSON file after each processed batch and reloaded at startup, so a
//! restarted engine skips observations it has already evaluated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use chokepoint_core::{ObservationValue, SignalType, StorageError};

/// Identifies one piece of signal state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey {
    pub chokepoint: String,
    pub signal_type: SignalType,
}

impl StateKey {
    pub fn new(chokepoint: impl Into<String>, signal_type: SignalType) -> Self {
        Self {
            chokepoint: chokepoint.into(),
            signal_type,
        }
    }
}

/// Mutable evaluation record for one rule at one chokepoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalState {
    /// Value of the last evaluated observation
    pub last_value: Option<ObservationValue>,
    /// Timestamp of the last evaluated observation; anything at or before it is skipped
    pub last_processed: Option<DateTime<Utc>>,
    /// When the persistence condition most recently became true
    pub first_true: Option<DateTime<Utc>>,
    /// False between a fire and the matching re-arm
    pub armed: bool,
    /// Recent numeric values for rate-of-change rules, oldest first
    #[serde(default)]
    pub window: VecDeque<f64>,
}

impl Default for SignalState {
    fn default() -> Self {
        Self {
            last_value: None,
            last_processed: None,
            first_true: None,
            armed: true,
            window: VecDeque::new(),
        }
    }
}

impl SignalState {
    /// Returns true if an observation at `ts` was already evaluated.
    #[must_use]
    pub fn has_processed(&self, ts: DateTime<Utc>) -> bool {
        self.last_processed.is_some_and(|last| ts <= last)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    #[serde(flatten)]
    key: StateKey,
    state: SignalState,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedStates {
    saved_at: Option<DateTime<Utc>>,
    states: Vec<PersistedEntry>,
}

/// Handles saving and loading the signal state map.
#[derive(Debug, Clone)]
pub struct SignalStatePersistence {
    path: PathBuf,
}

impl SignalStatePersistence {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saves all states, creating parent directories if needed.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    pub fn save(&self, states: &HashMap<StateKey, SignalState>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut entries: Vec<PersistedEntry> = states
            .iter()
            .map(|(key, state)| PersistedEntry {
                key: key.clone(),
                state: state.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        let persisted = PersistedStates {
            saved_at: Some(Utc::now()),
            states: entries,
        };
        let writer = BufWriter::new(File::create(&self.path)?);
        serde_json::to_writer_pretty(writer, &persisted)?;

        debug!(path = %self.path.display(), count = persisted.states.len(), "Saved signal state");
        Ok(())
    }

    /// Loads saved states. A missing or corrupt file yields an empty map.
    #[must_use]
    pub fn load(&self) -> HashMap<StateKey, SignalState> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No persisted signal state found, starting fresh");
            return HashMap::new();
        }

        match self.load_internal() {
            Ok(persisted) => {
                info!(
                    path = %self.path.display(),
                    count = persisted.states.len(),
                    "Loaded persisted signal state"
                );
                persisted
                    .states
                    .into_iter()
                    .map(|entry| (entry.key, entry.state))
                    .collect()
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to load persisted signal state, starting fresh"
                );
                HashMap::new()
            }
        }
    }

    fn load_internal(&self) -> Result<PersistedStates, StorageError> {
        let reader = BufReader::new(File::open(&self.path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::TempDir;

    fn temp_path() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("signal_state.json");
        (dir, path)
    }

    #[test]
    fn test_default_state_is_armed() {
        let state = SignalState::default();
        assert!(state.armed);
        assert!(state.last_processed.is_none());
        assert!(!state.has_processed(Utc::now()));
    }

    #[test]
    fn test_has_processed_is_inclusive() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let state = SignalState {
            last_processed: Some(ts),
            ..SignalState::default()
        };
        assert!(state.has_processed(ts));
        assert!(state.has_processed(ts - chrono::Duration::days(1)));
        assert!(!state.has_processed(ts + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let (_dir, path) = temp_path();
        let persistence = SignalStatePersistence::new(path);

        let mut states = HashMap::new();
        states.insert(
            StateKey::new("suez-canal", SignalType::CongestionSpike),
            SignalState {
                last_value: Some(ObservationValue::Number(12.0)),
                last_processed: Some(Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap()),
                first_true: None,
                armed: false,
                window: VecDeque::from(vec![8.0, 12.0]),
            },
        );
        persistence.save(&states).unwrap();

        let loaded = persistence.load();
        assert_eq!(loaded, states);
    }

    #[test]
    fn test_missing_file_starts_fresh() {
        let (_dir, path) = temp_path();
        assert!(SignalStatePersistence::new(path).load().is_empty());
    }

    #[test]
    fn test_corrupt_file_starts_fresh() {
        let (_dir, path) = temp_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = File::create(&path).unwrap();
        f.write_all(b"[[[").unwrap();

        assert!(SignalStatePersistence::new(path).load().is_empty());
    }
}
