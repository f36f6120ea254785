//! Retry policy for transient RPC failures.
//!
//! Rate limiting (HTTP 429) is handled separately by `provider::Pool::switch`
//! failover rather than by backing off on the same endpoint — see
//! `provider::is_rate_limited`. This module only concerns itself with
//! timeouts, network blips and 5xx responses, i.e. errors where retrying the
//! *same* endpoint is the right call.
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::time::{sleep, Duration};

/// Configuration for retry behavior against transient (non-rate-limit) errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries in the fast exponential backoff phase
    pub max_retries: u32,

    /// Initial delay in milliseconds before the first retry
    pub initial_delay_ms: u64,

    /// Multiplier for exponential backoff.
    /// Each retry delay = initial_delay_ms * backoff_multiplier^retry_count
    pub backoff_multiplier: u64,

    /// Wait time in seconds before entering extended retry mode.
    /// After max_retries is exhausted, wait this long before resetting the counter.
    pub extended_retry_wait_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 100,
            backoff_multiplier: 4,
            extended_retry_wait_seconds: 300,
        }
    }
}

impl RetryConfig {
    pub fn new(
        max_retries: u32,
        initial_delay_ms: u64,
        backoff_multiplier: u64,
        extended_retry_wait_seconds: u64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay_ms,
            backoff_multiplier,
            extended_retry_wait_seconds,
        }
    }

    /// Run `operation` until it succeeds, retrying every error.
    ///
    /// Two-phase strategy, deliberately unbounded: a long RPC outage should
    /// stall the chunk, not abandon it. Phase 1 retries up to `max_retries`
    /// times with exponential backoff;
    /// once exhausted, Phase 2 sleeps `extended_retry_wait_seconds`, logs at
    /// `warn!` with the total elapsed attempt count so the stall is
    /// observable, and loops back into Phase 1.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::error::Error,
    {
        let mut total_attempts: u64 = 0;
        let mut extended_retry_count = 0;

        loop {
            let mut retries = 0;

            loop {
                total_attempts += 1;
                match operation().await {
                    Ok(result) => return Ok(result),
                    Err(e) => {
                        if retries < self.max_retries {
                            let delay_ms = self
                                .initial_delay_ms
                                .saturating_mul(self.backoff_multiplier.pow(retries));

                            tracing::debug!(
                                attempt = retries + 1,
                                max_retries = self.max_retries,
                                delay_ms,
                                error = %e,
                                "transient RPC failure, retrying"
                            );

                            sleep(Duration::from_millis(delay_ms)).await;
                            retries += 1;
                            continue;
                        } else {
                            extended_retry_count += 1;
                            tracing::warn!(
                                total_attempts,
                                extended_retry_count,
                                wait_seconds = self.extended_retry_wait_seconds,
                                error = %e,
                                "max retries exhausted, entering extended retry wait"
                            );

                            sleep(Duration::from_secs(self.extended_retry_wait_seconds)).await;
                            break;
                        }
                    }
                }
            }
        }
    }
}
