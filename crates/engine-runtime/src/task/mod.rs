use crate::{
    error::RuntimeError,
    task::{fail_over::FailOverTask, leader::LeaderTask, sink::SinkTask, source::SourceTask},
};
use async_trait::async_trait;
use engine_config::settings::{ConnectorKind, ErrorsConfig};
use engine_processing::{
    collection::ConnectRecordCollection, context::PipelineContext, exception::Escalation,
};
use model::error::ConnectError;
use std::{fmt, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub mod fail_over;
pub mod leader;
pub mod sink;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

/// Where a task is in its poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Initializing,
    Subscribing,
    Consuming,
    Processing,
    Sinking,
    Sourcing,
    Committing,
    Recording,
    Cleanup,
    Stopped,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Initializing => "initializing",
            TaskState::Subscribing => "subscribing",
            TaskState::Consuming => "consuming",
            TaskState::Processing => "processing",
            TaskState::Sinking => "sinking",
            TaskState::Sourcing => "sourcing",
            TaskState::Committing => "committing",
            TaskState::Recording => "recording",
            TaskState::Cleanup => "cleanup",
            TaskState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[async_trait]
pub trait ConnectTask: Send {
    /// Runs the task's loop until `cancel` fires. A task that cannot
    /// subscribe ends in `Stopped` without polling.
    async fn execute(
        &mut self,
        connector: &str,
        task: u32,
        cancel: CancellationToken,
    ) -> Result<(), RuntimeError>;

    fn state(&self) -> TaskState;
}

/// Builds the task instances a connector supervisor runs.
pub trait TaskFactory: Send + Sync {
    fn create(&self, kind: ConnectorKind, ctx: &PipelineContext) -> Box<dyn ConnectTask>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTaskFactory;

impl TaskFactory for DefaultTaskFactory {
    fn create(&self, kind: ConnectorKind, ctx: &PipelineContext) -> Box<dyn ConnectTask> {
        create_task(kind, ctx)
    }
}

pub fn create_task(kind: ConnectorKind, ctx: &PipelineContext) -> Box<dyn ConnectTask> {
    let records = || Box::new(ConnectRecordCollection::new(ctx.clone()));
    match kind {
        ConnectorKind::Sink => Box::new(SinkTask::new(ctx.clone(), records())),
        ConnectorKind::Source => Box::new(SourceTask::new(ctx.clone(), records())),
        ConnectorKind::Leader => Box::new(LeaderTask::new(ctx.clone(), records())),
        ConnectorKind::Worker => Box::new(FailOverTask::new(ctx.clone())),
    }
}

/// Waits out a pause and starts the next poll iteration.
/// Returns the poll index, or `None` once the task is cancelled.
pub(crate) async fn begin_poll(
    ctx: &PipelineContext,
    connector: &str,
    task: u32,
    cancel: &CancellationToken,
) -> Option<u64> {
    ctx.exec
        .wait_while_paused(Some(connector), Some(task), cancel)
        .await;
    if cancel.is_cancelled() {
        return None;
    }

    let poll = ctx.exec.get_or_set_batch_context(connector, task, cancel);
    let index = ctx.exec.next_poll_index();
    poll.reset(index);
    Some(index)
}

/// Sleeps for `wait`. Returns false when cancelled first.
pub(crate) async fn sleep_or_cancel(wait: Duration, cancel: &CancellationToken) -> bool {
    if wait.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(wait) => true,
    }
}

/// Lets the exception handler decide whether the failure ends the task.
pub(crate) fn escalate(
    ctx: &PipelineContext,
    connector: &str,
    task: u32,
    errors: &ErrorsConfig,
    err: &ConnectError,
    cancel: &CancellationToken,
) -> Escalation {
    let escalation = ctx
        .exception_handler()
        .handle(connector, task, errors, err, || cancel.cancel());
    debug!(connector, task, ?escalation, "Failure handled");
    escalation
}

pub(crate) fn enter(state: &mut TaskState, next: TaskState, connector: &str, task: u32) {
    if *state != next {
        debug!(connector, task, from = %state, to = %next, "Task state changed");
        *state = next;
    }
}
