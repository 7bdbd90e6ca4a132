//! Bounded retry with exponential backoff, as an explicit state machine.
//!
//! `RetryState` decides after each failure whether to wait and try again or
//! give up. The async driver only sleeps at the points it is told to, so a
//! waiting job never blocks other series.

use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use chokepoint_core::{Collector, CollectionError, RawPayload, RetryConfig, SeriesKey, TimeRange};

use crate::error::JobFailure;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: if config.multiplier.is_finite() && config.multiplier >= 1.0 {
                config.multiplier
            } else {
                1.0
            },
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits, for tests and one-shot commands.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    #[must_use]
    pub fn start(&self) -> RetryState {
        RetryState {
            policy: *self,
            attempts: 0,
            next_backoff: self.initial_backoff,
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempts: u32,
    next_backoff: Duration,
}

impl RetryState {
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Records a failed attempt and decides the next step.
    ///
    /// Non-transient errors are never retried.
    pub fn on_failure(&mut self, error: &CollectionError) -> RetryDecision {
        self.attempts += 1;
        if !error.is_transient() || self.attempts >= self.policy.max_attempts {
            return RetryDecision::Exhausted;
        }
        let wait = self.next_backoff.min(self.policy.max_backoff);
        self.next_backoff = self
            .next_backoff
            .mul_f64(self.policy.multiplier)
            .min(self.policy.max_backoff);
        RetryDecision::RetryAfter(wait)
    }

    /// Records a successful attempt.
    pub fn on_success(&mut self) {
        self.attempts += 1;
    }
}

/// Fetches with a per-attempt timeout and bounded retries.
///
/// A timed-out attempt is cancelled and counts as a transient failure.
///
/// # Errors
/// Returns `JobFailure::Collection` once retries are exhausted.
pub async fn fetch_with_retry(
    collector: &dyn Collector,
    key: &SeriesKey,
    range: Option<TimeRange>,
    policy: &RetryPolicy,
    attempt_timeout: Duration,
) -> Result<RawPayload, JobFailure> {
    let mut state = policy.start();
    loop {
        let result = match timeout(attempt_timeout, collector.fetch(key, range)).await {
            Ok(result) => result,
            Err(_) => Err(CollectionError::Timeout(attempt_timeout)),
        };

        let error = match result {
            Ok(payload) => {
                state.on_success();
                return Ok(payload);
            }
            Err(e) => e,
        };

        match state.on_failure(&error) {
            RetryDecision::RetryAfter(wait) => {
                debug!(
                    series = %key,
                    attempt = state.attempts(),
                    wait_ms = wait.as_millis() as u64,
                    error = %error,
                    "Fetch failed, retrying"
                );
                tokio::time::sleep(wait).await;
            }
            RetryDecision::Exhausted => {
                warn!(
                    series = %key,
                    attempts = state.attempts(),
                    collector = collector.name(),
                    error = %error,
                    "Fetch failed for this cycle"
                );
                return Err(JobFailure::Collection {
                    attempts: state.attempts(),
                    error,
                });
            }
        }
    }
}
