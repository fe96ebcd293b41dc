use crate::dead_letter::DeadLetterRouter;
use engine_config::settings::ErrorsConfig;
use model::{
    error::ConnectError,
    records::{batch::ConnectBatch, record::ConnectRecord},
};
use tracing::{debug, error, info, warn};

/// What the handler decided for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// The task keeps polling.
    Continue,
    /// The task's own cancellation was requested.
    Cancel,
    /// Shutdown was already under way.
    Cancelled,
}

/// Single place where a task failure turns into a task cancellation.
#[derive(Clone)]
pub struct ExceptionHandler {
    router: DeadLetterRouter,
}

impl ExceptionHandler {
    pub fn new(router: DeadLetterRouter) -> Self {
        Self { router }
    }

    /// Logs the failure and invokes `cancel` when the tolerance does not cover it.
    /// Fatal failures cancel under any tolerance.
    pub fn handle<F>(
        &self,
        connector: &str,
        task: u32,
        errors: &ErrorsConfig,
        err: &ConnectError,
        cancel: F,
    ) -> Escalation
    where
        F: FnOnce(),
    {
        if err.is_cancellation() {
            info!(connector, task, "Task cancelled");
            return Escalation::Cancelled;
        }

        match err {
            ConnectError::Aggregate(_) | ConnectError::ToleranceExceeded(_) => {
                for inner in err.leaves() {
                    error!(connector, task, kind = ?inner.kind(), error = %inner, "Record failed");
                }
            }
            other => {
                error!(connector, task, kind = ?other.kind(), error = %other, "Fatal error");
            }
        }

        let fatal = err.leaves().iter().any(|e| matches!(e, ConnectError::Fatal(_)));
        if errors.tolerates() && !fatal {
            debug!(connector, task, "Failure tolerated");
            Escalation::Continue
        } else {
            cancel();
            Escalation::Cancel
        }
    }

    /// Routes the batch's failed records to the dead-letter topic, if one is configured.
    pub async fn handle_dead_letter(
        &self,
        batch: &ConnectBatch,
        err: &ConnectError,
        connector: &str,
        errors: &ErrorsConfig,
    ) -> usize {
        let failed: Vec<&ConnectRecord> = batch.failed().collect();
        if failed.is_empty() {
            return 0;
        }

        let Some(topic) = errors.dead_letter_topic() else {
            warn!(connector, failed = failed.len(), "No dead-letter topic, failed records dropped");
            return 0;
        };

        match self.router.send(topic, &failed, err, connector).await {
            Ok(sent) => sent,
            Err(e) => {
                error!(connector, error = %e, "Dead-letter routing failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dead_letter::{HEADER_KIND, HEADER_MESSAGE, HEADER_OFFSET},
        testing::{Clients, RecordingProducer, ScriptedConsumer, record},
    };
    use engine_config::settings::ErrorTolerance;
    use engine_core::metrics::Metrics;
    use model::{error::RecordFailure, records::partition::TopicPartitionOffset};
    use std::{cell::Cell, sync::Arc};
    use tracing_test::traced_test;

    fn handler(producer: Option<Arc<RecordingProducer>>) -> ExceptionHandler {
        let clients = Clients::new(ScriptedConsumer::default(), producer);
        ExceptionHandler::new(DeadLetterRouter::new(clients, Metrics::new()))
    }

    fn errors(tolerance: ErrorTolerance, topic: Option<&str>) -> ErrorsConfig {
        ErrorsConfig {
            tolerance,
            topic: topic.map(str::to_string),
        }
    }

    fn aggregate() -> ConnectError {
        ConnectError::Aggregate(vec![
            RecordFailure::new(
                TopicPartitionOffset::new("orders", 0, 1),
                ConnectError::data("missing id"),
            ),
            RecordFailure::new(
                TopicPartitionOffset::new("orders", 0, 2),
                ConnectError::data("bad amount"),
            ),
        ])
    }

    #[traced_test]
    #[test]
    fn intolerant_failures_cancel_the_task() {
        let cancelled = Cell::new(false);
        let escalation = handler(None).handle(
            "orders-sink",
            0,
            &errors(ErrorTolerance::None, None),
            &aggregate(),
            || cancelled.set(true),
        );

        assert_eq!(escalation, Escalation::Cancel);
        assert!(cancelled.get());
        assert!(logs_contain("missing id"));
        assert!(logs_contain("bad amount"));
    }

    #[test]
    fn tolerated_failures_keep_the_task_running() {
        let cancelled = Cell::new(false);
        let escalation = handler(None).handle(
            "orders-sink",
            0,
            &errors(ErrorTolerance::All, None),
            &ConnectError::ToleranceExceeded(vec![aggregate()]),
            || cancelled.set(true),
        );

        assert_eq!(escalation, Escalation::Continue);
        assert!(!cancelled.get());
    }

    #[test]
    fn fatal_failures_cancel_even_when_tolerated() {
        let cancelled = Cell::new(false);
        let escalation = handler(None).handle(
            "orders-sink",
            0,
            &errors(ErrorTolerance::All, None),
            &ConnectError::fatal("plugin crashed"),
            || cancelled.set(true),
        );

        assert_eq!(escalation, Escalation::Cancel);
        assert!(cancelled.get());
    }

    #[traced_test]
    #[test]
    fn cancellation_is_informational() {
        let cancelled = Cell::new(false);
        let escalation = handler(None).handle(
            "orders-sink",
            0,
            &errors(ErrorTolerance::None, None),
            &ConnectError::ToleranceExceeded(vec![ConnectError::Cancelled]),
            || cancelled.set(true),
        );

        assert_eq!(escalation, Escalation::Cancelled);
        assert!(!cancelled.get());
        assert!(logs_contain("Task cancelled"));
        assert!(!logs_contain("Fatal error"));
    }

    #[tokio::test]
    async fn only_failed_records_are_dead_lettered() {
        let producer = Arc::new(RecordingProducer::default());
        let handler = handler(Some(Arc::clone(&producer)));

        let mut failed = record("orders", 0, 1);
        failed.fail(ConnectError::data("missing id"));
        let batch = ConnectBatch::from_records(
            "orders-sink",
            vec![record("orders", 0, 0), failed, record("orders", 0, 2)],
        );

        let sent = handler
            .handle_dead_letter(
                &batch,
                &aggregate(),
                "orders-sink",
                &errors(ErrorTolerance::All, Some("orders-dlq")),
            )
            .await;

        assert_eq!(sent, 1);
        let messages = producer.sent_to("orders-dlq");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].headers[HEADER_OFFSET], b"1".to_vec());
        assert_eq!(messages[0].headers[HEADER_KIND], b"Data".to_vec());
        assert_eq!(
            messages[0].headers[HEADER_MESSAGE],
            b"Data error: missing id".to_vec()
        );
    }

    #[traced_test]
    #[tokio::test]
    async fn no_topic_means_no_dead_letters() {
        let producer = Arc::new(RecordingProducer::default());
        let handler = handler(Some(Arc::clone(&producer)));

        let mut failed = record("orders", 0, 1);
        failed.fail(ConnectError::data("missing id"));
        let batch = ConnectBatch::from_records("orders-sink", vec![failed.clone(), failed]);

        for config in [
            errors(ErrorTolerance::All, None),
            errors(ErrorTolerance::All, Some("  ")),
        ] {
            let sent = handler
                .handle_dead_letter(&batch, &aggregate(), "orders-sink", &config)
                .await;
            assert_eq!(sent, 0);
        }
        assert!(producer.sent.lock().unwrap().is_empty());
        assert!(logs_contain("No dead-letter topic, failed records dropped"));
    }
}
