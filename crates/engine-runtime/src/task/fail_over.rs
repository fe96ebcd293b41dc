use crate::{
    error::RuntimeError,
    task::{ConnectTask, TaskState, begin_poll, enter, sleep_or_cancel},
};
use async_trait::async_trait;
use engine_config::settings::ConnectorKind;
use engine_core::{connectors::broker::BrokerAdmin, context::NodeStatus};
use engine_processing::{
    cb::{CircuitBreaker, CircuitBreakerState},
    context::PipelineContext,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Watches broker metadata for every connector and restarts the worker
/// when one of them keeps failing.
pub struct FailOverTask {
    ctx: PipelineContext,
    state: TaskState,
}

impl FailOverTask {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            state: TaskState::Initializing,
        }
    }

    fn watched(&self) -> Vec<(String, Vec<String>)> {
        self.ctx
            .config
            .connector_names()
            .into_iter()
            .filter_map(|name| {
                let config = self.ctx.config.connector(&name)?;
                if config.kind == ConnectorKind::Worker {
                    return None;
                }
                let mut topics = config.topics.clone();
                topics.extend(config.command_topic.iter().cloned());
                Some((name, topics))
            })
            .collect()
    }

    /// One round of metadata checks. Returns the wait before the next round,
    /// or `None` once a worker restart was requested.
    async fn check(
        &mut self,
        admin: &dyn BrokerAdmin,
        breaker: &mut CircuitBreaker,
        period: Duration,
    ) -> Option<Duration> {
        let mut wait = period;
        for (connector, topics) in self.watched() {
            match admin.metadata(&topics).await {
                Ok(()) => {
                    if breaker.consecutive_failures(&connector) > 0 {
                        info!(connector = %connector, "Broker metadata available again");
                    }
                    breaker.record_success(&connector);
                }
                Err(err) => match breaker.record_failure(&connector) {
                    CircuitBreakerState::Open => {
                        error!(connector = %connector, error = %err, "Broker unavailable, restarting worker");
                        self.ctx.exec.restart(None, None);
                        return None;
                    }
                    CircuitBreakerState::RetryAfter(delay) => {
                        warn!(
                            connector = %connector,
                            failures = breaker.consecutive_failures(&connector),
                            error = %err,
                            "Broker metadata check failed"
                        );
                        wait = wait.min(delay);
                    }
                },
            }
        }
        Some(wait)
    }
}

#[async_trait]
impl ConnectTask for FailOverTask {
    async fn execute(
        &mut self,
        connector: &str,
        task: u32,
        cancel: CancellationToken,
    ) -> Result<(), RuntimeError> {
        enter(&mut self.state, TaskState::Initializing, connector, task);
        let config = self.ctx.config.fail_over();
        let mut breaker = CircuitBreaker::from_fail_over(&config);

        enter(&mut self.state, TaskState::Subscribing, connector, task);
        let admin = match self.ctx.clients.admin() {
            Ok(admin) => admin,
            Err(err) => {
                error!(connector, task, error = %err, "No broker admin client, fail-over disabled");
                enter(&mut self.state, TaskState::Stopped, connector, task);
                self.ctx
                    .exec
                    .set_status(Some(connector), Some(task), NodeStatus::Stopped);
                return Ok(());
            }
        };

        self.ctx
            .exec
            .set_status(Some(connector), Some(task), NodeStatus::Running);
        info!(connector, task, threshold = config.failure_threshold, "Fail-over task started");

        if sleep_or_cancel(config.initial_delay(), &cancel).await {
            while begin_poll(&self.ctx, connector, task, &cancel).await.is_some() {
                enter(&mut self.state, TaskState::Consuming, connector, task);
                let Some(wait) = self.check(admin.as_ref(), &mut breaker, config.period()).await
                else {
                    break;
                };
                if !sleep_or_cancel(wait, &cancel).await {
                    break;
                }
            }
        }

        enter(&mut self.state, TaskState::Stopped, connector, task);
        self.ctx
            .exec
            .set_status(Some(connector), Some(task), NodeStatus::Stopped);
        Ok(())
    }

    fn state(&self) -> TaskState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::testing::context_with;
    use engine_config::settings::{ConnectorConfig, FailOverConfig, WorkerConfig};
    use engine_core::connectors::broker::{BrokerClientFactory, BrokerConsumer, BrokerProducer};
    use model::error::ConnectError;
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    /// Fails the scripted number of metadata calls, then succeeds.
    struct FlakyAdmin {
        failures: Mutex<usize>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BrokerAdmin for FlakyAdmin {
        async fn metadata(&self, _: &[String]) -> Result<(), ConnectError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut failures = self.failures.lock().unwrap();
            if *failures == 0 {
                return Ok(());
            }
            *failures -= 1;
            Err(ConnectError::retriable("metadata timeout"))
        }
    }

    struct AdminOnly(Arc<FlakyAdmin>);

    impl BrokerClientFactory for AdminOnly {
        fn consumer(&self, _: &str, _: u32) -> Result<Box<dyn BrokerConsumer>, ConnectError> {
            Err(ConnectError::fatal("unused"))
        }

        fn producer(&self, _: &str) -> Result<Arc<dyn BrokerProducer>, ConnectError> {
            Err(ConnectError::fatal("unused"))
        }

        fn admin(&self) -> Result<Arc<dyn BrokerAdmin>, ConnectError> {
            Ok(Arc::clone(&self.0) as Arc<dyn BrokerAdmin>)
        }
    }

    fn worker(threshold: u32) -> WorkerConfig {
        let mut sink = ConnectorConfig::new("orders-sink", ConnectorKind::Sink, "log");
        sink.topics = vec!["orders".into()];
        let mut config = WorkerConfig::new("w1").with_connector(sink);
        config.fail_over = FailOverConfig {
            enabled: true,
            failure_threshold: threshold,
            initial_delay_ms: 0,
            period_ms: 1,
        };
        config
    }

    fn admin(failures: usize) -> Arc<FlakyAdmin> {
        Arc::new(FlakyAdmin {
            failures: Mutex::new(failures),
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn threshold_restarts_the_worker_exactly_once() {
        let admin = admin(usize::MAX);
        let ctx = context_with(worker(3), Arc::new(AdminOnly(Arc::clone(&admin))));
        let mut task = FailOverTask::new(ctx.clone());

        task.execute("fail-over", 0, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(admin.calls.load(Ordering::SeqCst), 3);
        assert_eq!(ctx.exec.worker().core.restart_requests(), 1);
        assert_eq!(task.state(), TaskState::Stopped);
    }

    #[tokio::test]
    async fn a_success_resets_the_failure_count() {
        let admin = admin(2);
        let ctx = context_with(worker(3), Arc::new(AdminOnly(Arc::clone(&admin))));
        let mut task = FailOverTask::new(ctx.clone());
        let mut breaker = CircuitBreaker::new(3, Duration::ZERO, Duration::ZERO);

        for _ in 0..3 {
            assert!(task.check(admin.as_ref(), &mut breaker, Duration::ZERO).await.is_some());
        }
        assert_eq!(breaker.consecutive_failures("orders-sink"), 0);

        *admin.failures.lock().unwrap() = 2;
        for _ in 0..2 {
            task.check(admin.as_ref(), &mut breaker, Duration::ZERO).await;
        }
        assert_eq!(breaker.consecutive_failures("orders-sink"), 2);
        assert_eq!(ctx.exec.worker().core.restart_requests(), 0);
    }
}
