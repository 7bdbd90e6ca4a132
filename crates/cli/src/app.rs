//! Wiring shared by the commands.
//!
//! Loads configuration and the chokepoint catalog, opens the CSV store and
//! the state files, and assembles a `JobDispatcher` with the PortWatch route.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use chokepoint_core::{load_catalog, AppConfig, ConfigLoader, SeriesStore};
use chokepoint_data::{CsvSeriesStore, UnresolvedGapStore};
use chokepoint_portwatch::{PortWatchClient, PortWatchProcessor, PORTWATCH_HOST};
use chokepoint_scheduler::{
    CollectionPipeline, JobDispatcher, RetryPolicy, ScheduleRegistry, SourceRoute, SourceRouter,
};
use chokepoint_signals::{build_registry, JsonlSink, LogSink, SignalEngine, SignalStatePersistence};

pub const SIGNAL_STATE_FILE: &str = "signal_state.json";
pub const UNRESOLVED_GAPS_FILE: &str = "unresolved_gaps.json";
pub const SIGNAL_LOG_FILE: &str = "signals.jsonl";

/// Location of `Config.toml` / `Config.json`.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Configuration directory
    #[arg(long, env = "CHOKEPOINT_CONFIG_DIR", default_value = "config")]
    pub config_dir: PathBuf,
}

impl ConfigArgs {
    pub fn load(&self) -> Result<AppConfig> {
        ConfigLoader::load_from(&self.config_dir).with_context(|| {
            format!(
                "failed to load configuration from {}",
                self.config_dir.display()
            )
        })
    }
}

/// Loads every chokepoint under `paths.chokepoints_dir` into a registry.
pub fn load_registry(config: &AppConfig) -> Result<ScheduleRegistry> {
    let dir = &config.paths.chokepoints_dir;
    let catalog = load_catalog(dir)
        .with_context(|| format!("failed to load chokepoint catalog from {}", dir.display()))?;
    ScheduleRegistry::from_catalog(&catalog).context("invalid schedule configuration")
}

pub fn open_store(config: &AppConfig) -> Result<Arc<CsvSeriesStore>> {
    let dir = &config.paths.data_dir;
    let store = CsvSeriesStore::open(dir)
        .with_context(|| format!("failed to open series store at {}", dir.display()))?;
    Ok(Arc::new(store))
}

/// Builds the dispatcher with every collaborator bound.
pub fn build_dispatcher(config: &AppConfig) -> Result<Arc<JobDispatcher>> {
    let registry = load_registry(config)?;
    let store: Arc<dyn SeriesStore> = open_store(config)?;

    let portwatch = PortWatchClient::new(&config.portwatch)
        .context("failed to build PortWatch client")?;
    let router = SourceRouter::new()
        .with_route(
            PORTWATCH_HOST,
            SourceRoute::new(Arc::new(portwatch), Arc::new(PortWatchProcessor::new())),
        )
        .bind(&registry)
        .context("failed to route series sources")?;
    let router = Arc::new(router);

    let pipeline = CollectionPipeline::new(router.clone(), router, store)
        .with_retry(RetryPolicy::from(&config.dispatcher.retry))
        .with_fetch_timeout(config.dispatcher.fetch_timeout());

    let state_dir = &config.paths.state_dir;
    std::fs::create_dir_all(state_dir)
        .with_context(|| format!("failed to create state directory {}", state_dir.display()))?;

    let rules = build_registry(config.signals.rules_file.as_deref())
        .context("failed to load signal rules")?;
    let engine = SignalEngine::with_persistence(
        rules,
        SignalStatePersistence::new(state_dir.join(SIGNAL_STATE_FILE)),
    );
    let unresolved = Arc::new(UnresolvedGapStore::load(state_dir.join(UNRESOLVED_GAPS_FILE)));

    let mut dispatcher = JobDispatcher::new(registry, Arc::new(pipeline), engine)
        .with_config(&config.dispatcher, &config.backfill)
        .with_unresolved(unresolved)
        .with_sink(Arc::new(LogSink));
    if config.signals.jsonl_sink {
        let jsonl = JsonlSink::new(state_dir.join(SIGNAL_LOG_FILE));
        dispatcher = dispatcher.with_sink(Arc::new(jsonl));
    }

    info!(
        series = dispatcher.registry().len(),
        data_dir = %config.paths.data_dir.display(),
        state_dir = %state_dir.display(),
        "Dispatcher ready"
    );
    Ok(Arc::new(dispatcher))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const PORTWATCH_SOURCE: &str = "https://portwatch.imf.org/pages/chokepoint1";

    fn write_config(root: &Path, source: &str) -> ConfigArgs {
        let chokepoint = root.join("chokepoints").join("suez-canal");
        fs::create_dir_all(&chokepoint).unwrap();
        fs::write(
            chokepoint.join("state_variables.json"),
            format!(
                r#"{{
                    "vessel_arrivals": {{"source": "{source}", "update_freq": "daily", "schedule_hour": 6}},
                    "vessel_arrivals_tanker": {{"source": "{source}", "update_freq": "daily", "schedule_hour": 6, "schedule_minute": 5}}
                }}"#
            ),
        )
        .unwrap();

        let config_dir = root.join("config");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(
            config_dir.join("Config.toml"),
            format!(
                "[paths]\nchokepoints_dir = \"{}\"\ndata_dir = \"{}\"\nstate_dir = \"{}\"\n",
                root.join("chokepoints").display(),
                root.join("data").display(),
                root.join("state").display(),
            ),
        )
        .unwrap();

        ConfigArgs { config_dir }
    }

    #[test]
    fn test_build_dispatcher_from_config_dir() {
        let dir = TempDir::new().unwrap();
        let args = write_config(dir.path(), PORTWATCH_SOURCE);
        let config = args.load().unwrap();

        let dispatcher = build_dispatcher(&config).unwrap();
        assert_eq!(dispatcher.registry().len(), 2);
        assert!(dir.path().join("state").is_dir());
        let key = chokepoint_core::SeriesKey::new("suez-canal", "vessel_arrivals");
        assert_eq!(dispatcher.store().count(&key).unwrap(), 0);
    }

    #[test]
    fn test_unknown_source_host_is_rejected() {
        let dir = TempDir::new().unwrap();
        let args = write_config(dir.path(), "https://example.com/feed");
        let config = args.load().unwrap();

        let err = build_dispatcher(&config).unwrap_err();
        assert!(format!("{err:#}").contains("example.com"));
    }

    #[test]
    fn test_missing_catalog_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.paths.chokepoints_dir = dir.path().join("nope");
        assert!(load_registry(&config).is_err());
    }
}
