//! Bounded retries for oracle calls
//!
//! The tool-use loop retries transient transport failures; the decision
//! caller additionally retries answers that do not fit their schema. Both go
//! through [`with_retry_if`], which only spends attempts on errors its
//! predicate accepts.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How often and how patiently to retry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, the first one included
    pub max_attempts: usize,
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Stretch each delay by up to a quarter
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A single attempt
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Pause before retry number `retry` (0 = first retry), capped at `max_delay`
    pub fn delay(&self, retry: usize) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let millis = (self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent))
            .min(self.max_delay.as_millis() as f64);

        let millis = if self.jitter {
            millis * (1.0 + 0.25 * unit_noise())
        } else {
            millis
        };
        Duration::from_millis(millis as u64)
    }

    /// The pauses a fully failing operation goes through
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts.saturating_sub(1)).map(|retry| self.delay(retry))
    }
}

/// Uniform-ish value in `[0, 1)` taken from a fresh v4 uuid
fn unit_noise() -> f64 {
    let bits = (uuid::Uuid::new_v4().as_u128() >> 80) as u64;
    bits as f64 / (1u64 << 48) as f64
}

/// Run `operation` until it succeeds, fails with an error `retryable`
/// rejects, or `config.max_attempts` is spent
///
/// Rejected errors come back immediately; the last accepted error comes back
/// once the budget is gone.
pub async fn with_retry_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    retryable: P,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if attempt >= attempts || !retryable(&error) {
            return Err(error);
        }

        let pause = config.delay(attempt - 1);
        warn!(
            attempt,
            of = attempts,
            pause_ms = pause.as_millis() as u64,
            error = %error,
            "Oracle call failed; retrying"
        );
        tokio::time::sleep(pause).await;
        attempt += 1;
    }
}

/// [`with_retry_if`] that treats every error as retryable
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    with_retry_if(config, |_| true, operation).await
}
