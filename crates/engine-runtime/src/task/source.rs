use crate::{
    error::RuntimeError,
    task::{ConnectTask, TaskState, begin_poll, enter, escalate, sleep_or_cancel},
};
use async_trait::async_trait;
use chrono::Utc;
use engine_config::settings::ConnectorKind;
use engine_core::context::NodeStatus;
use engine_processing::{
    collection::{RecordCollection, SourceOutcome},
    context::PipelineContext,
};
use futures::{StreamExt, stream};
use model::{command::CommandRecord, error::ConnectError, records::status::RecordStatus};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A command that filled its batch has more data waiting.
fn drains(command: &CommandRecord, produced: usize) -> bool {
    command.batch_size > 0 && produced >= command.batch_size
}

/// Runs the commands found on the connector's command topic through a source plugin.
pub struct SourceTask {
    ctx: PipelineContext,
    records: Box<dyn RecordCollection>,
    state: TaskState,
    next_wait: Duration,
}

impl SourceTask {
    pub fn new(ctx: PipelineContext, records: Box<dyn RecordCollection>) -> Self {
        Self {
            ctx,
            records,
            state: TaskState::Initializing,
            next_wait: Duration::ZERO,
        }
    }

    /// Wait applied before the most recent poll's successor.
    pub fn next_wait(&self) -> Duration {
        self.next_wait
    }

    /// Sources every outstanding command. Returns whether any command has a backlog.
    async fn poll(
        &mut self,
        connector: &str,
        task: u32,
        cancel: &CancellationToken,
    ) -> Result<bool, ConnectError> {
        enter(&mut self.state, TaskState::Consuming, connector, task);
        let commands = self.records.get_commands(cancel).await?;

        let mut drain = false;
        let mut failures = Vec::new();
        if !commands.is_empty() {
            enter(&mut self.state, TaskState::Sourcing, connector, task);
            let parallelism = self.ctx.config.batch(connector).parallelism.max(1);
            let records = &*self.records;
            let results: Vec<(CommandRecord, Result<SourceOutcome, ConnectError>)> =
                stream::iter(commands)
                    .map(move |command| async move {
                        let result = records.source(command.clone(), cancel).await;
                        (command, result)
                    })
                    .buffer_unordered(parallelism)
                    .collect()
                    .await;

            for (command, result) in results {
                match result {
                    Ok(outcome) => {
                        drain |= drains(&command, outcome.produced);
                        if let Err(err) = self.records.update_command(&outcome.command).await {
                            warn!(connector, task, command = %command.name, error = %err, "Command state not persisted");
                            self.records.hold_command(&command);
                            failures.push(err);
                        }
                    }
                    Err(err) if err.is_cancellation() => self.records.hold_command(&command),
                    Err(err) => {
                        error!(connector, task, command = %command.name, error = %err, "Command failed");
                        let mut failed = command.clone();
                        failed.status = RecordStatus::Failed;
                        failed.updated_at = Some(Utc::now());
                        if self.records.update_command(&failed).await.is_err() {
                            self.records.hold_command(&command);
                        }
                        failures.push(err);
                    }
                }
            }
        }

        enter(&mut self.state, TaskState::Committing, connector, task);
        self.records.commit().await?;

        if failures.is_empty() {
            Ok(drain)
        } else {
            Err(ConnectError::ToleranceExceeded(failures))
        }
    }

    fn stop(&mut self, connector: &str, task: u32) {
        enter(&mut self.state, TaskState::Stopped, connector, task);
        self.ctx
            .exec
            .set_status(Some(connector), Some(task), NodeStatus::Stopped);
    }
}

#[async_trait]
impl ConnectTask for SourceTask {
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

        if let Err(source) = self.records.setup(ConnectorKind::Source, connector, task) {
            self.stop(connector, task);
            return Err(RuntimeError::Setup {
                connector: connector.to_string(),
                task,
                source,
            });
        }

        enter(&mut self.state, TaskState::Subscribing, connector, task);
        if !self.records.try_subscribe().await || !self.records.try_publisher().await {
            warn!(connector, task, "Source task stopped before polling");
            self.stop(connector, task);
            return Ok(());
        }

        self.ctx
            .exec
            .set_status(Some(connector), Some(task), NodeStatus::Running);
        info!(connector, task, "Source task started");

        let timeout = self.ctx.config.batch(connector).timeout();
        while let Some(poll) = begin_poll(&self.ctx, connector, task, &cancel).await {
            self.next_wait = match self.poll(connector, task, &cancel).await {
                Ok(true) => Duration::ZERO,
                Ok(false) => timeout,
                Err(err) => {
                    if self.records.errors().tolerates() {
                        self.records.dead_letter(&err).await;
                    }
                    let errors = self.records.errors().clone();
                    escalate(&self.ctx, connector, task, &errors, &err, &cancel);
                    timeout
                }
            };

            enter(&mut self.state, TaskState::Recording, connector, task);
            self.records.record();
            self.records.notify_end_of_partition().await;
            self.records.clear();

            debug!(connector, task, poll, wait_ms = self.next_wait.as_millis() as u64, "Source poll finished");
            if !sleep_or_cancel(self.next_wait, &cancel).await {
                break;
            }
        }

        enter(&mut self.state, TaskState::Cleanup, connector, task);
        self.records.cleanup().await;
        self.stop(connector, task);
        info!(connector, task, "Source task stopped");
        Ok(())
    }

    fn state(&self) -> TaskState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::testing::{ScriptedRecords, context};
    use engine_config::settings::{ErrorTolerance, ErrorsConfig};
    use serde_json::json;

    fn command(name: &str, batch_size: usize) -> CommandRecord {
        CommandRecord::new(name, "users-source", batch_size, json!({}))
    }

    #[test]
    fn only_full_batches_drain() {
        assert!(drains(&command("users", 10), 10));
        assert!(drains(&command("users", 10), 11));
        assert!(!drains(&command("users", 10), 9));
        assert!(!drains(&command("users", 0), 5));
    }

    #[tokio::test]
    async fn an_idle_poll_still_commits_and_checks_end_of_partition() {
        let cancel = CancellationToken::new();
        let records = ScriptedRecords::new(ErrorsConfig::default()).stop_after(1, cancel.clone());
        let calls = records.calls();
        let mut task = SourceTask::new(context(), Box::new(records));

        task.execute("users-source", 0, cancel).await.unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "setup",
                "try_subscribe",
                "try_publisher",
                "get_commands",
                "commit",
                "record",
                "notify_end_of_partition",
                "clear",
                "cleanup",
            ]
        );
    }

    #[tokio::test]
    async fn a_full_command_skips_the_next_wait() {
        let cancel = CancellationToken::new();
        let records = ScriptedRecords::new(ErrorsConfig::default())
            .with_commands(vec![command("users", 10), command("orders", 10)])
            .producing("users", Ok(10))
            .producing("orders", Ok(3))
            .stop_after(1, cancel.clone());
        let updated = records.updated.clone();
        let mut task = SourceTask::new(context(), Box::new(records));

        task.execute("users-source", 0, cancel).await.unwrap();

        assert_eq!(task.next_wait(), Duration::ZERO);
        let updated = updated.lock().unwrap();
        assert_eq!(updated.len(), 2);
        assert!(updated.iter().all(|c| c.status == RecordStatus::Sourced));
    }

    #[tokio::test]
    async fn partial_batches_wait_for_the_batch_timeout() {
        let cancel = CancellationToken::new();
        let records = ScriptedRecords::new(ErrorsConfig::default())
            .with_commands(vec![command("orders", 10)])
            .producing("orders", Ok(3))
            .stop_after(1, cancel.clone());
        let mut task = SourceTask::new(context(), Box::new(records));

        task.execute("users-source", 0, cancel).await.unwrap();

        assert_eq!(task.next_wait(), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn one_failing_command_does_not_stop_the_others() {
        let cancel = CancellationToken::new();
        let errors = ErrorsConfig {
            tolerance: ErrorTolerance::All,
            topic: None,
        };
        let records = ScriptedRecords::new(errors)
            .with_commands(vec![command("users", 10), command("orders", 10)])
            .producing("users", Err(ConnectError::data("bad row")))
            .producing("orders", Ok(2))
            .stop_after(1, cancel.clone());
        let updated = records.updated.clone();
        let mut task = SourceTask::new(context(), Box::new(records));

        task.execute("users-source", 0, cancel.clone()).await.unwrap();

        let updated = updated.lock().unwrap();
        let status = |name: &str| {
            updated
                .iter()
                .find(|c| c.name == name)
                .map(|c| c.status)
        };
        assert_eq!(status("users"), Some(RecordStatus::Failed));
        assert_eq!(status("orders"), Some(RecordStatus::Sourced));
        assert_eq!(task.state(), TaskState::Stopped);
    }

    #[tokio::test]
    async fn failing_command_cancels_an_intolerant_task() {
        let records = ScriptedRecords::new(ErrorsConfig::default())
            .with_commands(vec![command("users", 10)])
            .producing("users", Err(ConnectError::data("bad row")));
        let cancel = CancellationToken::new();
        let mut task = SourceTask::new(context(), Box::new(records));

        task.execute("users-source", 0, cancel.clone()).await.unwrap();

        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_commands_are_held_back() {
        let records = ScriptedRecords::new(ErrorsConfig::default())
            .with_commands(vec![command("users", 10)])
            .producing("users", Err(ConnectError::Cancelled));
        let held = records.held.clone();
        let cancel = CancellationToken::new();
        let mut task = SourceTask::new(context(), Box::new(records));
        let stopper = cancel.clone();

        let run = tokio::spawn(async move {
            task.execute("users-source", 0, cancel).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        stopper.cancel();
        run.await.unwrap();

        assert!(held.lock().unwrap().iter().all(|name| name == "users"));
        assert!(!held.lock().unwrap().is_empty());
    }
}
