use crate::connectors::{
    converter::{JsonConverter, MessageConverter},
    processor::{Processor, ProcessorPipeline},
};
use async_trait::async_trait;
use model::{
    command::CommandRecord,
    error::ConnectError,
    records::{batch::ConnectBatch, record::ConnectRecord},
};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

/// Pushes processed records to an external system.
#[async_trait]
pub trait SinkHandler: Send + Sync {
    /// Returns the batch with per-record outcomes. Records the plugin could
    /// not write are marked failed and reported through `ConnectError::Aggregate`.
    async fn put(
        &self,
        connector: &str,
        task: u32,
        batch: ConnectBatch,
    ) -> Result<ConnectBatch, ConnectError>;
}

/// Records pulled for one command, plus the command state to persist.
#[derive(Debug, Clone, Default)]
pub struct SourcePoll {
    pub records: Vec<ConnectRecord>,
    pub command: Value,
}

/// Pulls data from an external system for a single work command.
#[async_trait]
pub trait SourceHandler: Send + Sync {
    async fn get(
        &self,
        connector: &str,
        task: u32,
        command: &CommandRecord,
    ) -> Result<SourcePoll, ConnectError>;
}

/// Discovers the commands a source connector should work on.
#[async_trait]
pub trait LeaderHandler: Send + Sync {
    async fn commands(&self, connector: &str, target: &str)
    -> Result<Vec<CommandRecord>, ConnectError>;
}

#[derive(Clone)]
pub enum Plugin {
    Sink(Arc<dyn SinkHandler>),
    Source(Arc<dyn SourceHandler>),
    Leader(Arc<dyn LeaderHandler>),
}

/// Named plugins and processors a worker can instantiate connectors from.
#[derive(Clone)]
pub struct PluginRegistry {
    plugins: HashMap<String, Plugin>,
    processors: HashMap<String, Arc<dyn Processor>>,
    converter: Arc<dyn MessageConverter>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self {
            plugins: HashMap::new(),
            processors: HashMap::new(),
            converter: Arc::new(JsonConverter),
        }
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, name: impl Into<String>, handler: Arc<dyn SinkHandler>) -> Self {
        self.plugins.insert(name.into(), Plugin::Sink(handler));
        self
    }

    pub fn with_source(mut self, name: impl Into<String>, handler: Arc<dyn SourceHandler>) -> Self {
        self.plugins.insert(name.into(), Plugin::Source(handler));
        self
    }

    pub fn with_leader(mut self, name: impl Into<String>, handler: Arc<dyn LeaderHandler>) -> Self {
        self.plugins.insert(name.into(), Plugin::Leader(handler));
        self
    }

    pub fn with_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processors
            .insert(processor.name().to_string(), processor);
        self
    }

    pub fn with_converter(mut self, converter: Arc<dyn MessageConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn converter(&self) -> Arc<dyn MessageConverter> {
        Arc::clone(&self.converter)
    }

    pub fn sink(&self, name: &str) -> Result<Arc<dyn SinkHandler>, ConnectError> {
        match self.plugins.get(name) {
            Some(Plugin::Sink(handler)) => Ok(Arc::clone(handler)),
            _ => Err(ConnectError::fatal(format!("No sink plugin named '{name}'"))),
        }
    }

    pub fn source(&self, name: &str) -> Result<Arc<dyn SourceHandler>, ConnectError> {
        match self.plugins.get(name) {
            Some(Plugin::Source(handler)) => Ok(Arc::clone(handler)),
            _ => Err(ConnectError::fatal(format!(
                "No source plugin named '{name}'"
            ))),
        }
    }

    pub fn leader(&self, name: &str) -> Result<Arc<dyn LeaderHandler>, ConnectError> {
        match self.plugins.get(name) {
            Some(Plugin::Leader(handler)) => Ok(Arc::clone(handler)),
            _ => Err(ConnectError::fatal(format!(
                "No leader plugin named '{name}'"
            ))),
        }
    }

    /// Builds the processor pipeline for the given names, in order.
    pub fn pipeline(&self, names: &[String]) -> Result<ProcessorPipeline, ConnectError> {
        names.iter().try_fold(ProcessorPipeline::new(), |pipeline, name| {
            self.processors
                .get(name)
                .map(|p| pipeline.add_processor(Arc::clone(p)))
                .ok_or_else(|| ConnectError::fatal(format!("Unknown processor '{name}'")))
        })
    }
}
