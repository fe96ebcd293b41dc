use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded automatic restarts for a worker, connector or task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartsConfig {
    pub attempts: u32,
    pub retry_wait_ms: u64,
    /// Window after which the attempt counter starts over.
    pub periodic_delay_ms: u64,
}

impl Default for RestartsConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_wait_ms: 1000,
            periodic_delay_ms: 60_000,
        }
    }
}

impl RestartsConfig {
    pub fn retry_wait(&self) -> Duration {
        Duration::from_millis(self.retry_wait_ms)
    }

    pub fn periodic_delay(&self) -> Duration {
        Duration::from_millis(self.periodic_delay_ms)
    }
}
