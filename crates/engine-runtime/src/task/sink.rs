use crate::{
    error::RuntimeError,
    task::{ConnectTask, TaskState, begin_poll, enter, escalate},
};
use async_trait::async_trait;
use engine_config::settings::ConnectorKind;
use engine_core::context::NodeStatus;
use engine_processing::{collection::RecordCollection, context::PipelineContext};
use model::error::ConnectError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Consumes topics and writes every batch through a sink plugin.
pub struct SinkTask {
    ctx: PipelineContext,
    records: Box<dyn RecordCollection>,
    state: TaskState,
}

impl SinkTask {
    pub fn new(ctx: PipelineContext, records: Box<dyn RecordCollection>) -> Self {
        Self {
            ctx,
            records,
            state: TaskState::Initializing,
        }
    }

    async fn poll(
        &mut self,
        connector: &str,
        task: u32,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectError> {
        enter(&mut self.state, TaskState::Consuming, connector, task);
        self.records.consume(cancel).await?;
        if self.records.batch().is_empty() {
            return Ok(());
        }

        enter(&mut self.state, TaskState::Processing, connector, task);
        self.records.process().await?;

        enter(&mut self.state, TaskState::Sinking, connector, task);
        self.records.sink(cancel).await?;

        enter(&mut self.state, TaskState::Committing, connector, task);
        self.records.commit().await
    }

    fn stop(&mut self, connector: &str, task: u32) {
        enter(&mut self.state, TaskState::Stopped, connector, task);
        self.ctx
            .exec
            .set_status(Some(connector), Some(task), NodeStatus::Stopped);
    }
}

#[async_trait]
impl ConnectTask for SinkTask {
    async fn execute(
        &mut self,
        connector: &str,
        task: u32,
        cancel: CancellationToken,
    ) -> Result<(), RuntimeError> {
        enter(&mut self.state, TaskState::Initializing, connector, task);
        self.ctx
            .exec
            .set_status(Some(connector), Some(task), NodeStatus::Initializing);

        if let Err(source) = self.records.setup(ConnectorKind::Sink, connector, task) {
            self.stop(connector, task);
            return Err(RuntimeError::Setup {
                connector: connector.to_string(),
                task,
                source,
            });
        }

        enter(&mut self.state, TaskState::Subscribing, connector, task);
        if !self.records.try_subscribe().await {
            warn!(connector, task, "Sink task stopped before polling");
            self.stop(connector, task);
            return Ok(());
        }

        self.ctx
            .exec
            .set_status(Some(connector), Some(task), NodeStatus::Running);
        info!(connector, task, "Sink task started");

        while let Some(poll) = begin_poll(&self.ctx, connector, task, &cancel).await {
            if let Err(err) = self.poll(connector, task, &cancel).await {
                // A cancelled batch is redelivered whole.
                if self.records.errors().tolerates() && !err.is_cancellation() {
                    let sent = self.records.dead_letter(&err).await;
                    debug!(connector, task, poll, sent, "Failed records dead-lettered");
                    if let Err(commit_err) = self.records.commit().await {
                        warn!(connector, task, poll, error = %commit_err, "Commit after failure did not go through");
                    }
                }
                let errors = self.records.errors().clone();
                escalate(&self.ctx, connector, task, &errors, &err, &cancel);
            }

            enter(&mut self.state, TaskState::Recording, connector, task);
            self.records.record();
            self.records.notify_end_of_partition().await;
            self.records.clear();
        }

        enter(&mut self.state, TaskState::Cleanup, connector, task);
        self.records.cleanup().await;
        self.stop(connector, task);
        info!(connector, task, "Sink task stopped");
        Ok(())
    }

    fn state(&self) -> TaskState {
        self.state
    }
}
