use crate::{
    error::RuntimeError,
    task::{ConnectTask, TaskState, begin_poll, enter, escalate, sleep_or_cancel},
};
use async_trait::async_trait;
use engine_config::settings::ConnectorKind;
use engine_core::context::NodeStatus;
use engine_processing::{collection::RecordCollection, context::PipelineContext};
use model::error::ConnectError;
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Publishes newly discovered commands to the target source connector.
///
/// Command names already present on the target's command topic are never
/// republished, so a restarted leader does not reset source progress.
pub struct LeaderTask {
    ctx: PipelineContext,
    records: Box<dyn RecordCollection>,
    state: TaskState,
    published: BTreeSet<String>,
}

impl LeaderTask {
    pub fn new(ctx: PipelineContext, records: Box<dyn RecordCollection>) -> Self {
        Self {
            ctx,
            records,
            state: TaskState::Initializing,
            published: BTreeSet::new(),
        }
    }

    pub fn published(&self) -> impl Iterator<Item = &str> {
        self.published.iter().map(String::as_str)
    }

    async fn poll(
        &mut self,
        connector: &str,
        task: u32,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectError> {
        enter(&mut self.state, TaskState::Consuming, connector, task);
        for command in self.records.get_commands(cancel).await? {
            self.published.insert(command.name);
        }

        enter(&mut self.state, TaskState::Processing, connector, task);
        let discovered = self.records.discover_commands().await?;

        enter(&mut self.state, TaskState::Sourcing, connector, task);
        for command in discovered {
            if self.published.contains(&command.name) {
                continue;
            }
            self.records.update_command(&command).await?;
            info!(connector, task, command = %command.name, target = %command.connector, "Command published");
            self.published.insert(command.name);
        }
        Ok(())
    }

    fn stop(&mut self, connector: &str, task: u32) {
        enter(&mut self.state, TaskState::Stopped, connector, task);
        self.ctx
            .exec
            .set_status(Some(connector), Some(task), NodeStatus::Stopped);
    }
}

#[async_trait]
impl ConnectTask for LeaderTask {
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

        if let Err(source) = self.records.setup(ConnectorKind::Leader, connector, task) {
            self.stop(connector, task);
            return Err(RuntimeError::Setup {
                connector: connector.to_string(),
                task,
                source,
            });
        }

        enter(&mut self.state, TaskState::Subscribing, connector, task);
        if !self.records.try_subscribe().await || !self.records.try_publisher().await {
            warn!(connector, task, "Leader task stopped before polling");
            self.stop(connector, task);
            return Ok(());
        }

        self.ctx
            .exec
            .set_status(Some(connector), Some(task), NodeStatus::Running);
        info!(connector, task, "Leader task started");

        let timeout = self.ctx.config.batch(connector).timeout();
        while begin_poll(&self.ctx, connector, task, &cancel).await.is_some() {
            if let Err(err) = self.poll(connector, task, &cancel).await {
                let errors = self.records.errors().clone();
                escalate(&self.ctx, connector, task, &errors, &err, &cancel);
            }

            enter(&mut self.state, TaskState::Recording, connector, task);
            self.records.record();
            self.records.clear();

            if !sleep_or_cancel(timeout, &cancel).await {
                break;
            }
        }

        enter(&mut self.state, TaskState::Cleanup, connector, task);
        self.records.cleanup().await;
        self.stop(connector, task);
        Ok(())
    }

    fn state(&self) -> TaskState {
        self.state
    }
}
