use crate::{
    error::ConfigError,
    settings::{connector::ConnectorKind, worker::WorkerConfig},
};
use tracing::{info, warn};

/// Checks a worker configuration before any connector is started.
pub struct ConfigValidator<'a> {
    config: &'a WorkerConfig,
}

impl<'a> ConfigValidator<'a> {
    pub fn new(config: &'a WorkerConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.config.name.trim().is_empty() {
            errors.push("worker name must not be empty".to_string());
        }

        self.validate_batch("worker", &self.config.batch, &mut errors);

        for (key, connector) in &self.config.connectors {
            if connector.name != *key {
                errors.push(format!(
                    "connector '{key}' is registered under a different name '{}'",
                    connector.name
                ));
            }

            if let Some(batch) = &connector.batch {
                self.validate_batch(key, batch, &mut errors);
            }

            match connector.kind {
                ConnectorKind::Sink if connector.topics.is_empty() => {
                    errors.push(format!("sink connector '{key}' has no topics"));
                }
                ConnectorKind::Source if connector.command_topic.is_none() => {
                    errors.push(format!("source connector '{key}' has no command_topic"));
                }
                ConnectorKind::Leader => match connector.target.as_deref() {
                    None => errors.push(format!("leader connector '{key}' has no target")),
                    Some(target) if !self.config.connectors.contains_key(target) => {
                        errors.push(format!(
                            "leader connector '{key}' targets unknown connector '{target}'"
                        ));
                    }
                    Some(_) => {}
                },
                _ => {}
            }

            if connector.max_tasks == 0 {
                warn!(connector = %key, "max_tasks is 0, running a single task");
            }
        }

        if !errors.is_empty() {
            return Err(ConfigError::ValidationFailed(errors));
        }

        info!(
            worker = %self.config.name,
            connectors = self.config.connectors.len(),
            "Configuration validated"
        );
        Ok(())
    }

    fn validate_batch(
        &self,
        scope: &str,
        batch: &crate::settings::batch::BatchConfig,
        errors: &mut Vec<String>,
    ) {
        if batch.size == 0 {
            errors.push(format!("{scope}: batch.size must be at least 1"));
        }
        if batch.parallelism == 0 {
            errors.push(format!("{scope}: batch.parallelism must be at least 1"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{BatchConfig, ConnectorConfig};

    fn sink(name: &str) -> ConnectorConfig {
        let mut c = ConnectorConfig::new(name, ConnectorKind::Sink, "log");
        c.topics = vec!["orders".to_string()];
        c
    }

    #[test]
    fn accepts_a_minimal_sink_worker() {
        let config = WorkerConfig::new("w1").with_connector(sink("orders-sink"));
        assert!(ConfigValidator::new(&config).validate().is_ok());
    }

    #[test]
    fn reports_every_problem_at_once() {
        let mut bad_sink = sink("orders-sink");
        bad_sink.topics.clear();
        bad_sink.batch = Some(BatchConfig {
            size: 0,
            ..BatchConfig::default()
        });

        let leader = ConnectorConfig::new("discovery", ConnectorKind::Leader, "tables");
        let source = ConnectorConfig::new("pg-source", ConnectorKind::Source, "pg");

        let config = WorkerConfig::new("w1")
            .with_connector(bad_sink)
            .with_connector(leader)
            .with_connector(source);

        match ConfigValidator::new(&config).validate() {
            Err(ConfigError::ValidationFailed(errors)) => {
                assert_eq!(errors.len(), 4, "{errors:?}");
                assert!(errors.iter().any(|e| e.contains("has no topics")));
                assert!(errors.iter().any(|e| e.contains("batch.size")));
                assert!(errors.iter().any(|e| e.contains("has no target")));
                assert!(errors.iter().any(|e| e.contains("has no command_topic")));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }
}
