use crate::{
    connector::ConnectorSupervisor,
    error::RuntimeError,
    task::{DefaultTaskFactory, TaskFactory, sleep_or_cancel},
};
use engine_config::{provider::ConfigProvider, settings::ConnectorKind};
use engine_core::{
    connectors::{broker::BrokerClientFactory, plugin::PluginRegistry},
    context::{
        ExecutionContext, NodeStatus,
        snapshot::{WorkerDetails, WorkerStatus},
    },
    metrics::MetricsSnapshot,
};
use engine_processing::context::PipelineContext;
use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};

/// Name of the built-in broker health connector.
pub const FAIL_OVER_CONNECTOR: &str = "fail-over";

/// Top of the supervision tree: runs every connector of the worker.
pub struct Worker {
    ctx: PipelineContext,
    factory: Arc<dyn TaskFactory>,
}

impl Worker {
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        clients: Arc<dyn BrokerClientFactory>,
        plugins: PluginRegistry,
    ) -> Self {
        Self {
            ctx: PipelineContext::new(config, clients, plugins),
            factory: Arc::new(DefaultTaskFactory),
        }
    }

    pub fn with_factory(mut self, factory: Arc<dyn TaskFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Handle for pause, resume and restart commands.
    pub fn execution(&self) -> &ExecutionContext {
        &self.ctx.exec
    }

    pub fn status(&self) -> WorkerStatus {
        self.ctx.exec.get_status()
    }

    pub fn details(&self) -> WorkerDetails {
        self.ctx.exec.get_full_details()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    /// Configured connectors, plus the fail-over connector when enabled and
    /// no worker connector is configured.
    pub fn connectors(&self) -> Vec<(String, ConnectorKind)> {
        let config = &self.ctx.config;
        let mut connectors: Vec<(String, ConnectorKind)> = config
            .connector_names()
            .into_iter()
            .filter_map(|name| {
                let kind = config.connector(&name)?.kind;
                Some((name, kind))
            })
            .collect();

        let has_worker = connectors.iter().any(|(_, k)| *k == ConnectorKind::Worker);
        if config.fail_over().enabled && !has_worker {
            connectors.push((FAIL_OVER_CONNECTOR.to_string(), ConnectorKind::Worker));
        }
        connectors
    }

    /// Runs until `shutdown` fires. A worker-scope restart stops every
    /// connector and starts them again.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), RuntimeError> {
        let name = self.ctx.config.worker_name().to_string();
        let restarts = self.ctx.config.restarts(None);
        let exec = &self.ctx.exec;

        loop {
            let token = exec.initialize_worker(&name, &restarts, &shutdown);
            exec.set_status(None, None, NodeStatus::Running);
            let connectors = self.connectors();
            info!(worker = %name, connectors = connectors.len(), "Worker started");

            let handles: Vec<_> = connectors
                .into_iter()
                .map(|(connector, kind)| {
                    let supervisor = ConnectorSupervisor::new(self.ctx.clone(), connector, kind)
                        .with_factory(Arc::clone(&self.factory));
                    let token = token.clone();
                    tokio::spawn(
                        async move {
                            let result = supervisor.run(&token).await;
                            (supervisor.name().to_string(), result)
                        }
                        .in_current_span(),
                    )
                })
                .collect();

            for joined in join_all(handles).await {
                match joined {
                    Ok((_, Ok(()))) => {}
                    Ok((connector, Err(err))) => {
                        error!(worker = %name, connector = %connector, error = %err, "Connector failed");
                    }
                    Err(err) => error!(worker = %name, error = %err, "Connector supervisor panicked"),
                }
            }

            if shutdown.is_cancelled() {
                break;
            }
            if !exec.take_restart_request(None, None) {
                break;
            }

            if exec.retry(None, None) {
                let wait = exec.retry_wait(None, None);
                warn!(worker = %name, wait_ms = wait.as_millis() as u64, "Worker restarting");
                if !sleep_or_cancel(wait, &shutdown).await {
                    break;
                }
            } else {
                warn!(worker = %name, "Worker restart attempts exhausted, connectors stay paused");
                exec.pause(None, None);
            }
        }

        exec.set_status(None, None, NodeStatus::Stopped);
        info!(worker = %name, "Worker stopped");
        Ok(())
    }
}
