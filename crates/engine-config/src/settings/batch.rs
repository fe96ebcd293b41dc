use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How much a task pulls per poll and how long it waits for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub size: usize,
    /// Concurrent source commands per task.
    pub parallelism: usize,
    pub timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 100,
            parallelism: 1,
            timeout_ms: 1000,
        }
    }
}

impl BatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
