use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Worker-level fail-over driven by broker metadata health checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailOverConfig {
    pub enabled: bool,
    /// Consecutive failures on one connector before the worker restarts.
    pub failure_threshold: u32,
    pub initial_delay_ms: u64,
    pub period_ms: u64,
}

impl Default for FailOverConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            failure_threshold: 3,
            initial_delay_ms: 0,
            period_ms: 10_000,
        }
    }
}

impl FailOverConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}
