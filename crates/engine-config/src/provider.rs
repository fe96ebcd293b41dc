use crate::{
    error::ConfigError,
    settings::{
        BatchConfig, ConnectorConfig, ConsumerSettings, EofConfig, ErrorsConfig, FailOverConfig,
        RestartsConfig, RetryConfig, WorkerConfig, validator::ConfigValidator,
    },
};
use std::path::Path;
use tracing::info;

/// Resolved configuration as seen by the engine.
///
/// Connector sections override the worker defaults; every lookup for an
/// unknown connector falls back to the worker-level value.
pub trait ConfigProvider: Send + Sync {
    fn worker(&self) -> &WorkerConfig;

    fn worker_name(&self) -> &str {
        &self.worker().name
    }

    fn connector(&self, name: &str) -> Option<&ConnectorConfig> {
        self.worker().connectors.get(name)
    }

    fn connector_names(&self) -> Vec<String> {
        self.worker().connectors.keys().cloned().collect()
    }

    fn consumer(&self) -> ConsumerSettings {
        self.worker().consumer
    }

    fn fail_over(&self) -> FailOverConfig {
        self.worker().fail_over.clone()
    }

    fn max_tasks(&self, connector: &str) -> usize {
        self.connector(connector).map_or(1, ConnectorConfig::max_tasks)
    }

    fn topics(&self, connector: &str) -> Vec<String> {
        self.connector(connector)
            .map(|c| c.topics.clone())
            .unwrap_or_default()
    }

    fn command_topic(&self, connector: &str) -> Option<String> {
        self.connector(connector).and_then(|c| c.command_topic.clone())
    }

    fn batch(&self, connector: &str) -> BatchConfig {
        self.connector(connector)
            .and_then(|c| c.batch.clone())
            .unwrap_or_else(|| self.worker().batch.clone())
    }

    fn retries(&self, connector: &str) -> RetryConfig {
        self.connector(connector)
            .and_then(|c| c.retries.clone())
            .unwrap_or_else(|| self.worker().retries.clone())
    }

    fn errors(&self, connector: &str) -> ErrorsConfig {
        self.connector(connector)
            .and_then(|c| c.errors.clone())
            .unwrap_or_else(|| self.worker().errors.clone())
    }

    fn eof(&self, connector: &str) -> EofConfig {
        self.connector(connector)
            .and_then(|c| c.eof.clone())
            .unwrap_or_else(|| self.worker().eof.clone())
    }

    /// Restart policy for a connector, or for the worker itself when `None`.
    fn restarts(&self, connector: Option<&str>) -> RestartsConfig {
        connector
            .and_then(|name| self.connector(name))
            .and_then(|c| c.restarts.clone())
            .unwrap_or_else(|| self.worker().restarts.clone())
    }
}

/// Provider over a fixed, validated [`WorkerConfig`].
#[derive(Debug, Clone)]
pub struct StaticConfigProvider {
    config: WorkerConfig,
}

impl StaticConfigProvider {
    pub fn new(mut config: WorkerConfig) -> Result<Self, ConfigError> {
        config.normalize();
        ConfigValidator::new(&config).validate()?;
        Ok(Self { config })
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: WorkerConfig = serde_json::from_str(json)?;
        Self::new(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let provider = Self::from_json(&json)?;
        info!(path = %path.display(), worker = %provider.config.name, "Loaded worker configuration");
        Ok(provider)
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn worker(&self) -> &WorkerConfig {
        &self.config
    }
}
