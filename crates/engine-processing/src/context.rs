use crate::{
    dead_letter::DeadLetterRouter, exception::ExceptionHandler, partition::PartitionHandler,
    retry::RetriableHandler,
};
use engine_config::{provider::ConfigProvider, settings::RetryConfig};
use engine_core::{
    connectors::{broker::BrokerClientFactory, plugin::PluginRegistry},
    context::ExecutionContext,
    metrics::Metrics,
    retry::RetryPolicy,
};
use std::sync::Arc;

/// Everything a task needs from the worker, shared by all of its tasks.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<dyn ConfigProvider>,
    pub clients: Arc<dyn BrokerClientFactory>,
    pub plugins: PluginRegistry,
    pub exec: ExecutionContext,
    pub metrics: Metrics,
}

impl PipelineContext {
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        clients: Arc<dyn BrokerClientFactory>,
        plugins: PluginRegistry,
    ) -> Self {
        let exec = ExecutionContext::new(config.worker_name(), &config.restarts(None));
        Self {
            config,
            clients,
            plugins,
            exec,
            metrics: Metrics::new(),
        }
    }

    pub fn dead_letter_router(&self) -> DeadLetterRouter {
        DeadLetterRouter::new(Arc::clone(&self.clients), self.metrics.clone())
    }

    pub fn exception_handler(&self) -> ExceptionHandler {
        ExceptionHandler::new(self.dead_letter_router())
    }

    pub fn partition_handler(&self) -> PartitionHandler {
        PartitionHandler::new(
            self.config.consumer(),
            Arc::clone(&self.clients),
            self.metrics.clone(),
        )
    }

    pub fn retriable_handler(&self, retries: &RetryConfig) -> RetriableHandler {
        RetriableHandler::new(RetryPolicy::from(retries), self.metrics.clone())
    }
}
