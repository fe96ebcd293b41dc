use engine_config::settings::FailOverConfig;
use std::{collections::HashMap, time::Duration};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CircuitBreakerState {
    /// Below the threshold; check again after the delay.
    RetryAfter(Duration),
    /// Threshold reached. The counter has been reset.
    Open,
}

/// Consecutive-failure counters, one per connector.
#[derive(Clone, Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    base_delay: Duration,
    max_delay: Duration,
    consecutive_failures: HashMap<String, u32>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            base_delay,
            max_delay: if max_delay.is_zero() {
                base_delay
            } else {
                max_delay
            },
            consecutive_failures: HashMap::new(),
        }
    }

    pub fn from_fail_over(config: &FailOverConfig) -> Self {
        Self::new(config.failure_threshold, config.period(), config.period())
    }

    pub fn record_failure(&mut self, connector: &str) -> CircuitBreakerState {
        let failures = self
            .consecutive_failures
            .entry(connector.to_string())
            .or_insert(0);
        *failures = failures.saturating_add(1);
        let count = *failures;

        if count >= self.threshold {
            *failures = 0;
            CircuitBreakerState::Open
        } else {
            CircuitBreakerState::RetryAfter(self.delay_for(count))
        }
    }

    pub fn record_success(&mut self, connector: &str) {
        self.consecutive_failures.remove(connector);
    }

    pub fn consecutive_failures(&self, connector: &str) -> u32 {
        self.consecutive_failures
            .get(connector)
            .copied()
            .unwrap_or_default()
    }

    fn delay_for(&self, failures: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::from_millis(0);
        }

        let exponent = failures.saturating_sub(1).min(6);
        let factor = 1u128 << exponent;
        let base_ms = self.base_delay.as_millis();
        let delay_ms = base_ms.saturating_mul(factor);
        let capped = delay_ms.min(self.max_delay.as_millis());
        Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX))
    }
}
