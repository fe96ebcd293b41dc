use crate::{
    error::RuntimeError,
    task::{DefaultTaskFactory, TaskFactory, sleep_or_cancel},
};
use engine_config::settings::ConnectorKind;
use engine_core::context::NodeStatus;
use engine_processing::context::PipelineContext;
use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

/// Runs the tasks of one connector and keeps them alive.
///
/// Each cycle spawns `max_tasks` tasks and waits for all of them. A task
/// restart re-spawns that slot only. Anything else ends the cycle: a connector
/// restart starts the next one immediately, a fault or a clean exit consumes
/// one restart attempt, and an exhausted budget pauses the connector.
pub struct ConnectorSupervisor {
    ctx: PipelineContext,
    name: String,
    kind: ConnectorKind,
    factory: Arc<dyn TaskFactory>,
}

impl ConnectorSupervisor {
    pub fn new(ctx: PipelineContext, name: impl Into<String>, kind: ConnectorKind) -> Self {
        Self {
            ctx,
            name: name.into(),
            kind,
            factory: Arc::new(DefaultTaskFactory),
        }
    }

    pub fn with_factory(mut self, factory: Arc<dyn TaskFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Supervises the connector until `parent` is cancelled.
    pub async fn run(&self, parent: &CancellationToken) -> Result<(), RuntimeError> {
        let name = self.name.as_str();
        let exec = &self.ctx.exec;
        let restarts = self.ctx.config.restarts(Some(name));

        exec.initialize_connector(name, &restarts, parent);
        if self.ctx.config.connector(name).is_some_and(|c| c.paused) {
            exec.pause(Some(name), None);
        }
        info!(connector = name, kind = %self.kind, "Connector started");

        while !parent.is_cancelled() {
            if exec.is_paused(Some(name), None) {
                debug!(connector = name, "Connector paused");
                exec.set_status(Some(name), None, NodeStatus::Running);
                exec.wait_while_paused(Some(name), None, parent).await;
                continue;
            }

            let token = exec.initialize_connector(name, &restarts, parent);
            exec.set_status(Some(name), None, NodeStatus::Running);
            let outcome = self.run_tasks(&token).await;

            if parent.is_cancelled() {
                break;
            }
            if exec.take_restart_request(Some(name), None) {
                info!(connector = name, "Connector restarting");
                continue;
            }

            if let Err(err) = outcome {
                error!(connector = name, error = %err, "Connector task faulted");
            }

            if exec.retry(Some(name), None) {
                let wait = exec.retry_wait(Some(name), None);
                warn!(connector = name, wait_ms = wait.as_millis() as u64, "Connector tasks ended, retrying");
                sleep_or_cancel(wait, parent).await;
            } else {
                warn!(connector = name, "Restart attempts exhausted, pausing connector");
                exec.pause(Some(name), None);
            }
        }

        exec.set_status(Some(name), None, NodeStatus::Stopped);
        info!(connector = name, "Connector stopped");
        Ok(())
    }

    async fn run_tasks(&self, token: &CancellationToken) -> Result<(), RuntimeError> {
        let max_tasks = self.ctx.config.max_tasks(&self.name);
        let handles: Vec<_> = (0..max_tasks as u32)
            .map(|id| {
                let slot = TaskSlot {
                    ctx: self.ctx.clone(),
                    factory: Arc::clone(&self.factory),
                    connector: self.name.clone(),
                    kind: self.kind,
                    id,
                };
                let token = token.clone();
                tokio::spawn(async move { slot.run(&token).await }.in_current_span())
            })
            .collect();

        let mut fault = None;
        for joined in join_all(handles).await {
            let result = joined.map_err(RuntimeError::from).and_then(|r| r);
            if let Err(err) = result {
                error!(connector = %self.name, error = %err, "Task failed");
                fault.get_or_insert(err);
            }
        }
        fault.map_or(Ok(()), Err)
    }
}

/// One task id of a connector. Re-spawns its task on a task-scope restart.
struct TaskSlot {
    ctx: PipelineContext,
    factory: Arc<dyn TaskFactory>,
    connector: String,
    kind: ConnectorKind,
    id: u32,
}

impl TaskSlot {
    async fn run(self, connector_token: &CancellationToken) -> Result<(), RuntimeError> {
        let connector = self.connector.as_str();
        let restarts = self.ctx.config.restarts(Some(connector));
        loop {
            let token = self
                .ctx
                .exec
                .initialize_task(connector, self.id, &restarts, connector_token);
            let mut task = self.factory.create(self.kind, &self.ctx);
            let result = task.execute(connector, self.id, token).await;

            if !connector_token.is_cancelled()
                && self.ctx.exec.take_restart_request(Some(connector), Some(self.id))
            {
                info!(connector, task = self.id, "Task restarting");
                continue;
            }
            return result;
        }
    }
}
