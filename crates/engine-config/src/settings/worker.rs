use crate::settings::{
    batch::BatchConfig, connector::ConnectorConfig, eof::EofConfig, errors::ErrorsConfig,
    failover::FailOverConfig, restarts::RestartsConfig, retry::RetryConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Broker consumer offset handling.
///
/// With auto-commit off the engine commits explicitly. With auto-commit on and
/// auto offset-store off the engine stores offsets for the client to commit.
/// With both on the client owns offsets entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    pub enable_auto_commit: bool,
    pub enable_auto_offset_store: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub name: String,
    pub group_id: String,
    pub consumer: ConsumerSettings,
    pub batch: BatchConfig,
    pub retries: RetryConfig,
    pub errors: ErrorsConfig,
    pub eof: EofConfig,
    pub restarts: RestartsConfig,
    pub fail_over: FailOverConfig,
    pub connectors: BTreeMap<String, ConnectorConfig>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            group_id: "connect".to_string(),
            consumer: ConsumerSettings::default(),
            batch: BatchConfig::default(),
            retries: RetryConfig::default(),
            errors: ErrorsConfig::default(),
            eof: EofConfig::default(),
            restarts: RestartsConfig::default(),
            fail_over: FailOverConfig::default(),
            connectors: BTreeMap::new(),
        }
    }
}

impl WorkerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_connector(mut self, connector: ConnectorConfig) -> Self {
        self.connectors.insert(connector.name.clone(), connector);
        self
    }

    /// Fills connector names from their map keys where the entry left it out.
    pub fn normalize(&mut self) {
        for (key, connector) in self.connectors.iter_mut() {
            if connector.name.is_empty() {
                connector.name = key.clone();
            }
        }
    }
}
