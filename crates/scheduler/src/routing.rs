//! Routes each series to the collector and processor for its source.
//!
//! Routes are keyed by the host of the variable's `source` URL. Every
//! registered series is bound at startup, so an unroutable source is a
//! configuration error rather than a failure on first fire.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use chokepoint_core::{
    CollectionError, Collector, ConfigError, Observation, ProcessError, Processor, RawPayload,
    SeriesKey, TimeRange,
};

use crate::registry::ScheduleRegistry;

#[derive(Clone)]
pub struct SourceRoute {
    pub collector: Arc<dyn Collector>,
    pub processor: Arc<dyn Processor>,
}

impl SourceRoute {
    pub fn new(collector: Arc<dyn Collector>, processor: Arc<dyn Processor>) -> Self {
        Self {
            collector,
            processor,
        }
    }
}

#[derive(Default)]
pub struct SourceRouter {
    routes: HashMap<String, SourceRoute>,
    fallback: Option<SourceRoute>,
    bindings: HashMap<SeriesKey, SourceRoute>,
}

impl SourceRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves every source whose URL host is `host`.
    #[must_use]
    pub fn with_route(mut self, host: impl Into<String>, route: SourceRoute) -> Self {
        self.routes.insert(host.into().to_lowercase(), route);
        self
    }

    /// Serves series whose source matches no route.
    #[must_use]
    pub fn with_fallback(mut self, route: SourceRoute) -> Self {
        self.fallback = Some(route);
        self
    }

    /// Binds every series in `registry` to a route.
    ///
    /// # Errors
    /// Returns `ConfigError::UnknownSource` for a source with no route and no
    /// fallback.
    pub fn bind(mut self, registry: &ScheduleRegistry) -> Result<Self, ConfigError> {
        for (key, series) in registry.iter() {
            let route = self.resolve(series.source.as_deref())?;
            debug!(series = %key, source = series.source.as_deref().unwrap_or("-"), "Bound source");
            self.bindings.insert(key.clone(), route);
        }
        Ok(self)
    }

    fn resolve(&self, source: Option<&str>) -> Result<SourceRoute, ConfigError> {
        let host = source
            .and_then(|s| Url::parse(s).ok())
            .and_then(|url| url.host_str().map(str::to_lowercase));

        let routed = host.as_deref().and_then(|h| {
            self.routes.get(h).or_else(|| {
                // portwatch.imf.org also matches a route for imf.org
                self.routes
                    .iter()
                    .find(|(route_host, _)| h.ends_with(&format!(".{route_host}")))
                    .map(|(_, route)| route)
            })
        });

        routed
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| ConfigError::UnknownSource(source.unwrap_or("<none>").to_string()))
    }

    fn route_for(&self, key: &SeriesKey) -> Option<&SourceRoute> {
        self.bindings.get(key).or(self.fallback.as_ref())
    }

    #[must_use]
    pub fn is_bound(&self, key: &SeriesKey) -> bool {
        self.bindings.contains_key(key)
    }
}

#[async_trait]
impl Collector for SourceRouter {
    async fn fetch(
        &self,
        key: &SeriesKey,
        range: Option<TimeRange>,
    ) -> Result<RawPayload, CollectionError> {
        match self.route_for(key) {
            Some(route) => route.collector.fetch(key, range).await,
            None => Err(CollectionError::Unsupported(key.to_string())),
        }
    }

    fn name(&self) -> &str {
        "router"
    }
}

impl Processor for SourceRouter {
    fn transform(&self, payload: &RawPayload) -> Result<Vec<Observation>, ProcessError> {
        match self.route_for(&payload.key) {
            Some(route) => route.processor.transform(payload),
            None => Err(ProcessError::Malformed(format!(
                "no processor bound for {}",
                payload.key
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chokepoint_core::{ObservationValue, ScheduleConfig};
    use chrono::{TimeZone, Utc};

    struct Named(&'static str);

    #[async_trait]
    impl Collector for Named {
        async fn fetch(
            &self,
            key: &SeriesKey,
            _range: Option<TimeRange>,
        ) -> Result<RawPayload, CollectionError> {
            Ok(RawPayload::new(key.clone(), serde_json::json!(self.0)))
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    impl Processor for Named {
        fn transform(&self, payload: &RawPayload) -> Result<Vec<Observation>, ProcessError> {
            let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
            Ok(vec![Observation::new(
                payload.key.clone(),
                ts,
                ObservationValue::Enum(self.0.to_string()),
            )])
        }
    }

    fn route(name: &'static str) -> SourceRoute {
        SourceRoute::new(Arc::new(Named(name)), Arc::new(Named(name)))
    }

    fn registry_with(source: &str) -> (ScheduleRegistry, SeriesKey) {
        let key = SeriesKey::new("suez-canal", "vessel_arrivals");
        let variable = chokepoint_core::VariableConfig {
            key: key.clone(),
            description: String::new(),
            source: source.to_string(),
            schedule: ScheduleConfig::parse("daily", 0, 0).unwrap(),
            value_type: chokepoint_core::ValueType::Number,
        };
        let mut registry = ScheduleRegistry::new();
        registry.register_variable(&variable).unwrap();
        (registry, key)
    }

    #[tokio::test]
    async fn test_routes_by_source_host() {
        let (registry, key) = registry_with("https://portwatch.imf.org/datasets/chokepoints");
        let router = SourceRouter::new()
            .with_route("imf.org", route("imf"))
            .with_route("example.com", route("other"))
            .bind(&registry)
            .unwrap();

        let payload = router.fetch(&key, None).await.unwrap();
        assert_eq!(payload.body, serde_json::json!("imf"));
        let observations = router.transform(&payload).unwrap();
        assert_eq!(observations[0].value, ObservationValue::Enum("imf".to_string()));
    }

    #[test]
    fn test_unknown_source_is_config_error() {
        let (registry, _) = registry_with("https://news.example.org/feed");
        let result = SourceRouter::new()
            .with_route("imf.org", route("imf"))
            .bind(&registry);
        assert!(matches!(result, Err(ConfigError::UnknownSource(_))));
    }

    #[test]
    fn test_fallback_serves_unmatched_sources() {
        let (registry, key) = registry_with("Lloyd's List");
        let router = SourceRouter::new()
            .with_fallback(route("manual"))
            .bind(&registry)
            .unwrap();
        assert!(router.is_bound(&key));
    }

    #[tokio::test]
    async fn test_unbound_key_is_unsupported() {
        let router = SourceRouter::new();
        let err = router
            .fetch(&SeriesKey::new("x", "y"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::Unsupported(_)));
    }
}
