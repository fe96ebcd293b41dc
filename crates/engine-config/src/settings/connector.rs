use crate::settings::{
    batch::BatchConfig, eof::EofConfig, errors::ErrorsConfig, restarts::RestartsConfig,
    retry::RetryConfig,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of task a connector runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorKind {
    /// Discovers source work and publishes it as commands.
    Leader,
    /// Worker housekeeping (broker health / fail-over).
    Worker,
    Sink,
    Source,
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectorKind::Leader => "leader",
            ConnectorKind::Worker => "worker",
            ConnectorKind::Sink => "sink",
            ConnectorKind::Source => "source",
        };
        f.write_str(s)
    }
}

/// Per-connector configuration. Unset sections fall back to the worker defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default)]
    pub name: String,
    pub kind: ConnectorKind,
    #[serde(default)]
    pub plugin: String,
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub topics: Vec<String>,
    /// Topic holding source commands (source connectors, and the leader's target).
    #[serde(default)]
    pub command_topic: Option<String>,
    /// Source connector a leader publishes commands for.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub batch: Option<BatchConfig>,
    #[serde(default)]
    pub retries: Option<RetryConfig>,
    #[serde(default)]
    pub errors: Option<ErrorsConfig>,
    #[serde(default)]
    pub eof: Option<EofConfig>,
    #[serde(default)]
    pub restarts: Option<RestartsConfig>,
    /// Field processors applied in order to every record.
    #[serde(default)]
    pub processors: Vec<String>,
    /// Plugin specific settings, passed through untouched.
    #[serde(default)]
    pub settings: serde_json::Value,
}

fn default_max_tasks() -> usize {
    1
}

impl ConnectorConfig {
    pub fn new(name: impl Into<String>, kind: ConnectorKind, plugin: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            plugin: plugin.into(),
            max_tasks: default_max_tasks(),
            paused: false,
            topics: Vec::new(),
            command_topic: None,
            target: None,
            batch: None,
            retries: None,
            errors: None,
            eof: None,
            restarts: None,
            processors: Vec::new(),
            settings: serde_json::Value::Null,
        }
    }

    /// Number of task instances, never below one.
    pub fn max_tasks(&self) -> usize {
        self.max_tasks.max(1)
    }
}
