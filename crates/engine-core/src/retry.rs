use engine_config::settings::{BackoffStrategy, RetryConfig};
use model::error::ConnectError;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Attempt budget and backoff schedule for batch retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.attempts,
            config.delay(),
            config.max_delay(),
            config.backoff,
        )
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff: BackoffStrategy,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: if max_delay.is_zero() {
                base_delay
            } else {
                max_delay
            },
            backoff,
        }
    }

    /// Delay before the attempt following `attempt` (zero based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis();
        let delay_ms = match self.backoff {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Linear => base_ms.saturating_mul(u128::from(attempt) + 1),
            BackoffStrategy::Exponential => base_ms.saturating_mul(1u128 << attempt.min(6)),
        };
        let capped = delay_ms.min(self.max_delay.as_millis().max(base_ms));
        Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX))
    }

    /// Sleeps for the backoff delay, returning early with `Cancelled` on shutdown.
    pub async fn wait(&self, attempt: u32, cancel: &CancellationToken) -> Result<(), ConnectError> {
        let delay = self.backoff_delay(attempt);
        if delay.is_zero() {
            return if cancel.is_cancelled() {
                Err(ConnectError::Cancelled)
            } else {
                Ok(())
            };
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(ConnectError::Cancelled),
            _ = sleep(delay) => Ok(()),
        }
    }
}
