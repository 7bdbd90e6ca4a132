//! IMF PortWatch collector with rate limiting.
//!
//! Queries the ArcGIS feature service behind the PortWatch chokepoint
//! dashboard for daily transit counts. Requests are rate-limited with the
//! governor crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::{Client, StatusCode};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use chokepoint_core::{
    CollectionError, Collector, PortWatchConfig, RawPayload, SeriesKey, TimeRange,
};

use crate::processor::attribute_for;
use crate::types::QueryResponse;

/// Host of PortWatch source URLs in variable configuration.
pub const PORTWATCH_HOST: &str = "portwatch.imf.org";

/// Records requested per incremental query. The service returns one record
/// per day, newest first, so this covers the last 100 days.
pub const INCREMENTAL_RECORD_COUNT: u32 = 100;

/// ArcGIS `portid` of each tracked chokepoint.
#[must_use]
pub fn portid(chokepoint: &str) -> Option<&'static str> {
    match chokepoint {
        "suez-canal" => Some("chokepoint1"),
        "panama-canal" => Some("chokepoint2"),
        "bosporus-strait" => Some("chokepoint3"),
        "bab-el-mandeb" => Some("chokepoint4"),
        "strait-of-malacca" => Some("chokepoint5"),
        "strait-of-hormuz" => Some("chokepoint6"),
        _ => None,
    }
}

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

pub struct PortWatchClient {
    query_url: String,
    http: Client,
    rate_limiter: Arc<DirectLimiter>,
    requests_per_minute: NonZeroU32,
    timeout: Duration,
}

impl std::fmt::Debug for PortWatchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortWatchClient")
            .field("query_url", &self.query_url)
            .field("requests_per_minute", &self.requests_per_minute)
            .finish_non_exhaustive()
    }
}

impl PortWatchClient {
    /// Creates a client from configuration.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: &PortWatchConfig) -> Result<Self, CollectionError> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollectionError::Network(format!("failed to build HTTP client: {e}")))?;

        let requests_per_minute =
            NonZeroU32::new(config.requests_per_minute).unwrap_or(nonzero!(30u32));
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(requests_per_minute)));

        Ok(Self {
            query_url: config.query_url.clone(),
            http,
            rate_limiter,
            requests_per_minute,
            timeout,
        })
    }

    /// Sets a custom query URL (useful for testing).
    #[must_use]
    pub fn with_query_url(mut self, url: impl Into<String>) -> Self {
        self.query_url = url.into();
        self
    }

    #[must_use]
    pub fn query_url(&self) -> &str {
        &self.query_url
    }

    /// Query parameters. The record limit applies only when the range starts
    /// within the window it covers; older ranges fetch the full history.
    fn query_params(
        portid: &str,
        range: Option<TimeRange>,
        now: DateTime<Utc>,
    ) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("where", format!("portid='{portid}'")),
            ("outFields", "*".to_string()),
            ("orderByFields", "date DESC".to_string()),
            ("f", "json".to_string()),
        ];
        let window = chrono::Duration::days(i64::from(INCREMENTAL_RECORD_COUNT) - 1);
        if range.is_some_and(|r| r.start >= now - window) {
            params.push(("resultRecordCount", INCREMENTAL_RECORD_COUNT.to_string()));
        }
        params
    }

    async fn query(
        &self,
        params: &[(&'static str, String)],
    ) -> Result<QueryResponse, CollectionError> {
        self.rate_limiter.until_ready().await;
        debug!(url = %self.query_url, "GET PortWatch query");

        let response = self
            .http
            .get(&self.query_url)
            .query(params)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CollectionError::Upstream {
                status: status.as_u16(),
                message: truncate(&text),
            });
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| CollectionError::Decode(e.to_string()))?;

        if let Some(error) = &body.error {
            let status = error
                .code
                .and_then(|c| u16::try_from(c).ok())
                .unwrap_or(StatusCode::BAD_GATEWAY.as_u16());
            return Err(CollectionError::Upstream {
                status,
                message: error.message.clone(),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl Collector for PortWatchClient {
    async fn fetch(
        &self,
        key: &SeriesKey,
        range: Option<TimeRange>,
    ) -> Result<RawPayload, CollectionError> {
        let portid = portid(&key.chokepoint).ok_or_else(|| {
            CollectionError::Unsupported(format!("unknown chokepoint '{}'", key.chokepoint))
        })?;
        if attribute_for(&key.variable).is_none() {
            return Err(CollectionError::Unsupported(format!(
                "variable '{}' is not served by PortWatch",
                key.variable
            )));
        }

        let mut body = self
            .query(&Self::query_params(portid, range, Utc::now()))
            .await?;
        let received = body.features.len();
        if let Some(range) = range {
            let start_ms = range.start.timestamp_millis();
            body.features
                .retain(|f| f.date_ms().is_some_and(|ms| ms >= start_ms));
            if received == INCREMENTAL_RECORD_COUNT as usize && body.features.len() == received {
                // all records are newer than the range start; older ones may be cut off
                warn!(
                    series = %key,
                    start = %range.start,
                    "Incremental query hit the record limit"
                );
            }
        }

        debug!(
            series = %key,
            portid,
            received,
            kept = body.features.len(),
            since = %range.map_or_else(|| "-".to_string(), |r| format_day(r.start)),
            "PortWatch query complete"
        );

        let body =
            serde_json::to_value(&body).map_err(|e| CollectionError::Decode(e.to_string()))?;
        Ok(RawPayload::new(key.clone(), body))
    }

    fn name(&self) -> &str {
        "imf-portwatch"
    }
}

fn map_transport_error(e: reqwest::Error, timeout: Duration) -> CollectionError {
    if e.is_timeout() {
        CollectionError::Timeout(timeout)
    } else {
        CollectionError::Network(e.to_string())
    }
}

fn format_day(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

fn truncate(text: &str) -> String {
    const MAX: usize = 200;
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
