//! Retry policy with exponential backoff.
//!
//! Only failures classified as transient are retried. Authentication,
//! not-found, corruption and cancellation end the pass on first sight.
//! Backoff sleeps race the cancellation token, so a user interrupt during a
//! wait is observed immediately.

use std::time::Duration;

use issuecache_core::SyncConfig;
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;

/// Default retry configuration
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;
pub const DEFAULT_MAX_DELAY_MS: u64 = 5000;
pub const DEFAULT_MAX_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry (doubles each attempt)
    pub initial_delay: Duration,
    /// Upper bound for any single computed delay
    pub max_delay: Duration,
    /// Longest server-requested wait we honour; a longer `Retry-After` ends
    /// the pass instead of retrying early
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            max_retry_after: Duration::from_secs(DEFAULT_MAX_RETRY_AFTER_SECS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            max_retry_after: Duration::from_secs(DEFAULT_MAX_RETRY_AFTER_SECS),
        }
    }

    pub fn with_max_retry_after(mut self, max_retry_after: Duration) -> Self {
        self.max_retry_after = max_retry_after;
        self
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.max_retries,
            config.initial_backoff_ms,
            config.max_backoff_ms,
        )
        .with_max_retry_after(Duration::from_secs(config.max_retry_after_secs))
    }

    /// Calculate the delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Exponential backoff: initial_delay * 2^attempt
        let factor = 2u64.saturating_pow(attempt);
        let delay_ms = (self.initial_delay.as_millis() as u64).saturating_mul(factor);
        let capped = delay_ms.min(self.max_delay.as_millis() as u64);
        Duration::from_millis(capped)
    }

    /// Computed delay, raised to the server's `Retry-After` when that is
    /// longer. `None` when the server asks for more than `max_retry_after`.
    pub fn delay_with_hint(&self, attempt: u32, retry_after: Option<Duration>) -> Option<Duration> {
        let computed = self.delay_for_attempt(attempt);
        match retry_after {
            Some(hint) if hint > self.max_retry_after => None,
            Some(hint) => Some(hint.max(computed)),
            None => Some(computed),
        }
    }

    /// Decide what to do after a failed attempt.
    ///
    /// Returns `Ok(())` after sleeping when the operation should be tried
    /// again, incrementing `attempt`. Otherwise hands the error back: it is
    /// not retryable, the retry budget is spent, or the token fired while
    /// waiting (in which case the error becomes [`SyncError::Cancelled`]).
    pub async fn backoff(
        &self,
        error: SyncError,
        attempt: &mut u32,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        if !error.kind().is_retryable() {
            tracing::debug!(kind = %error.kind(), "Non-retryable error: {}", error);
            return Err(error);
        }
        if *attempt >= self.max_retries {
            tracing::warn!(attempts = *attempt + 1, "Giving up after retries: {}", error);
            return Err(error);
        }

        let Some(delay) = self.delay_with_hint(*attempt, error.retry_after()) else {
            tracing::warn!(
                retry_after = ?error.retry_after(),
                limit = ?self.max_retry_after,
                "Server asked for a longer wait than allowed: {}",
                error
            );
            return Err(error);
        };
        *attempt += 1;
        tracing::warn!(
            "Retry attempt {} of {}, waiting {:?}: {}",
            *attempt,
            self.max_retries,
            delay,
            error
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
