use crate::config::AppConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads application configuration from `config/`.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load() -> Result<AppConfig> {
        Self::load_from("config")
    }

    /// Loads application configuration by merging defaults, TOML, environment
    /// variables, and JSON found in `dir`.
    ///
    /// Environment variables use the `CHOKEPOINT_` prefix; `__` separates
    /// nested keys (e.g. `CHOKEPOINT_DISPATCHER__TICK_SECS=30`).
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load_from(dir: impl AsRef<Path>) -> Result<AppConfig> {
        let dir = dir.as_ref();
        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(dir.join("Config.toml")))
            .merge(Env::prefixed("CHOKEPOINT_").split("__"))
            .join(Json::file(dir.join("Config.json")))
            .extract()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_missing_files_yield_defaults() {
        let dir = tempdir().unwrap();
        let config = ConfigLoader::load_from(dir.path()).unwrap();
        assert_eq!(config.dispatcher.tick_secs, 60);
        assert!(config.signals.jsonl_sink);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("Config.toml"),
            r#"
[backfill]
lookback_days = 7
grace_secs = 120

[portwatch]
requests_per_minute = 5
"#,
        )
        .unwrap();

        let config = ConfigLoader::load_from(dir.path()).unwrap();
        assert_eq!(config.backfill.lookback_days, 7);
        assert_eq!(config.backfill.grace_secs, Some(120));
        assert_eq!(config.portwatch.requests_per_minute, 5);
        assert_eq!(config.portwatch.timeout_secs, 30);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Config.toml"), "[dispatcher\ntick_secs = ").unwrap();
        assert!(ConfigLoader::load_from(dir.path()).is_err());
    }
}
