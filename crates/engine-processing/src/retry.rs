use engine_core::{metrics::Metrics, retry::RetryPolicy};
use model::{
    error::{ConnectError, RecordFailure},
    records::{batch::ConnectBatch, record::ConnectRecord, status::RecordStatus},
};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Indicates whether a failed record should be attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retry,
    Stop,
}

pub fn classify(err: &ConnectError) -> RetryDisposition {
    if err.is_retriable() {
        RetryDisposition::Retry
    } else {
        RetryDisposition::Stop
    }
}

pub fn log_retry_exception(connector: &str, err: &ConnectError, attempts: u32) {
    warn!(connector, attempts, error = %err, "Batch attempt failed");
}

/// Drives a unit of work over a batch, reattempting only the records whose
/// failure is retriable.
///
/// Work receives the pending records and must return them in the same order,
/// either tagged with per-record outcomes or through `ConnectError::Aggregate`.
/// With an aggregate, every pending record it does not name succeeded.
/// Records already failed or skipped on entry are carried through untouched.
/// Data and fatal failures settle their record after the first attempt.
#[derive(Debug, Clone, Default)]
pub struct RetriableHandler {
    policy: RetryPolicy,
    metrics: Metrics,
}

impl RetriableHandler {
    pub fn new(policy: RetryPolicy, metrics: Metrics) -> Self {
        Self { policy, metrics }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `work` until every pending record settles or attempts run out.
    ///
    /// On return `batch` holds every record in its original position with its
    /// final status. A non-aggregate failure is never retried and surfaces as
    /// `ToleranceExceeded`, as does exhausting the attempt budget. `success`
    /// is the status of records an aggregate failure leaves out.
    pub async fn retry<F, Fut>(
        &self,
        mut work: F,
        batch: &mut ConnectBatch,
        connector: &str,
        success: RecordStatus,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectError>
    where
        F: FnMut(ConnectBatch) -> Fut,
        Fut: Future<Output = Result<ConnectBatch, ConnectError>>,
    {
        let taken = std::mem::take(batch);
        let mut slots = taken.records().to_vec();
        let shell = taken.with_records(Vec::new());
        let entry: Vec<RecordStatus> = slots.iter().map(ConnectRecord::status).collect();

        let mut pending: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.is_failed() && r.status() != RecordStatus::Skipped)
            .map(|(i, _)| i)
            .collect();
        let mut observed = Vec::new();
        let mut attempt = 0u32;

        let result = loop {
            if pending.is_empty() {
                break Ok(());
            }

            let input: Vec<ConnectRecord> = pending
                .iter()
                .map(|&i| {
                    let mut record = slots[i].clone();
                    if record.is_failed() {
                        record.reset(entry[i]);
                    }
                    record
                })
                .collect();

            let outcome = match work(shell.clone().with_records(input.clone())).await {
                Ok(out) if out.len() == input.len() => out.into_records(),
                Ok(out) => {
                    let err = ConnectError::fatal(format!(
                        "Work returned {} record(s) for {} pending",
                        out.len(),
                        input.len()
                    ));
                    for &i in &pending {
                        slots[i].fail(err.clone());
                    }
                    break Err(ConnectError::ToleranceExceeded(vec![err]));
                }
                Err(ConnectError::Aggregate(failures)) => {
                    apply_failures(connector, input, failures, success)
                }
                Err(err) if err.is_cancellation() => {
                    for &i in &pending {
                        slots[i].set_can_commit_offset(false);
                    }
                    break Err(err);
                }
                Err(err) => {
                    for &i in &pending {
                        slots[i].fail(err.clone());
                    }
                    break Err(ConnectError::ToleranceExceeded(vec![err]));
                }
            };

            let mut retriable = Vec::new();
            let mut failures = Vec::new();
            for (index, record) in pending.iter().copied().zip(outcome) {
                if let Some(failure) = record.failure().filter(|_| record.is_failed()) {
                    if classify(&failure.error) == RetryDisposition::Retry {
                        retriable.push(index);
                    }
                    failures.push(failure);
                }
                slots[index] = record;
            }

            if failures.is_empty() {
                break Ok(());
            }

            let remaining = self.policy.max_attempts.saturating_sub(attempt);
            log_retry_exception(connector, &ConnectError::Aggregate(failures.clone()), remaining);
            observed.extend(failures.into_iter().map(|f| f.error));

            pending = retriable;
            if pending.is_empty() {
                break Ok(());
            }

            attempt += 1;
            if attempt >= self.policy.max_attempts {
                break Err(ConnectError::ToleranceExceeded(std::mem::take(&mut observed)));
            }

            self.metrics.increment_retries(1);
            if let Err(err) = self.policy.wait(attempt - 1, cancel).await {
                // Left for redelivery.
                for &i in &pending {
                    slots[i].reset(entry[i]);
                    slots[i].set_can_commit_offset(false);
                }
                break Err(err);
            }
        };

        *batch = shell.with_records(slots);
        result
    }
}

/// Tags the records named by an aggregate failure and marks the rest with
/// `success`. Positions are matched in order so duplicate coordinates each
/// claim one record.
fn apply_failures(
    connector: &str,
    mut records: Vec<ConnectRecord>,
    failures: Vec<RecordFailure>,
    success: RecordStatus,
) -> Vec<ConnectRecord> {
    let mut claimed = vec![false; records.len()];
    for failure in failures {
        let found = records
            .iter()
            .enumerate()
            .position(|(i, r)| !claimed[i] && r.position() == failure.position);
        match found {
            Some(i) => {
                claimed[i] = true;
                records[i].fail(failure.error);
            }
            None => debug!(connector, %failure, "Failure does not match a pending record"),
        }
    }
    for (record, _) in records.iter_mut().zip(claimed).filter(|(_, c)| !c) {
        record.set_status(success);
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_config::settings::BackoffStrategy;
    use model::records::{message::Message, partition::TopicPartitionOffset};
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };
    use tracing_test::traced_test;

    fn handler(attempts: u32) -> RetriableHandler {
        RetriableHandler::new(
            RetryPolicy::new(
                attempts,
                Duration::from_millis(1),
                Duration::from_millis(1),
                BackoffStrategy::Fixed,
            ),
            Metrics::new(),
        )
    }

    fn record(topic: &str, offset: i64) -> ConnectRecord {
        ConnectRecord::sink(
            TopicPartitionOffset::new(topic, 0, offset),
            Message::new(None, Some(b"{}".to_vec())),
        )
    }

    fn batch(topics: &[&str]) -> ConnectBatch {
        ConnectBatch::from_records(
            "orders",
            topics
                .iter()
                .enumerate()
                .map(|(i, t)| record(t, i as i64))
                .collect(),
        )
    }

    /// Fails every record whose topic names an error kind, a fixed number of times.
    fn failing_work(
        invocations: Arc<AtomicUsize>,
        failing_rounds: usize,
    ) -> impl FnMut(ConnectBatch) -> std::future::Ready<Result<ConnectBatch, ConnectError>> {
        let mut round = 0;
        move |mut batch: ConnectBatch| {
            round += 1;
            invocations.fetch_add(batch.len(), Ordering::SeqCst);
            for record in batch.iter_mut() {
                let err = match record.topic.as_str() {
                    "retriable-exception" if round <= failing_rounds => {
                        Some(ConnectError::retriable("broker unavailable"))
                    }
                    "data-exception" => Some(ConnectError::data("bad payload")),
                    _ => None,
                };
                match err {
                    Some(err) => record.fail(err),
                    None => record.set_status(RecordStatus::Sinked),
                }
            }
            std::future::ready(Ok(batch))
        }
    }

    #[traced_test]
    #[tokio::test]
    async fn mixed_batch_retries_only_the_retriable_record() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let mut batch = batch(&["retriable-exception", "data-exception"]);

        handler(3)
            .retry(
                failing_work(Arc::clone(&invocations), 1),
                &mut batch,
                "orders",
                RecordStatus::Sinked,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.records()[0].status(), RecordStatus::Sinked);
        assert_eq!(batch.records()[1].status(), RecordStatus::Failed);
        assert!(logs_contain("attempts=3"));
        assert!(!logs_contain("attempts=2"));
    }

    #[tokio::test]
    async fn single_error_is_not_retried() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&invocations);
        let mut batch = batch(&["orders", "orders"]);

        let err = handler(3)
            .retry(
                move |_batch: ConnectBatch| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    std::future::ready(Err(ConnectError::retriable("connection reset")))
                },
                &mut batch,
                "orders",
                RecordStatus::Sinked,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert!(matches!(err, ConnectError::ToleranceExceeded(ref inner) if inner.len() == 1));
        assert_eq!(batch.failed().count(), 2);
    }

    #[tokio::test]
    async fn retriable_aggregate_exhausts_attempts() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&invocations);
        let mut batch = batch(&["orders"]);

        let err = handler(3)
            .retry(
                move |batch: ConnectBatch| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let failures = batch
                        .iter()
                        .map(|r| {
                            RecordFailure::new(r.position(), ConnectError::retriable("timeout"))
                        })
                        .collect();
                    std::future::ready(Err(ConnectError::Aggregate(failures)))
                },
                &mut batch,
                "orders",
                RecordStatus::Sinked,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        match err {
            ConnectError::ToleranceExceeded(inner) => assert_eq!(inner.len(), 3),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(batch.records()[0].is_failed());
    }

    #[tokio::test]
    async fn failed_and_skipped_records_are_not_handed_to_work() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let mut batch = batch(&["orders", "orders", "orders"]);
        batch.records_mut()[0].fail(ConnectError::data("unparseable"));
        batch.records_mut()[1].set_status(RecordStatus::Skipped);

        handler(3)
            .retry(
                failing_work(Arc::clone(&invocations), 0),
                &mut batch,
                "orders",
                RecordStatus::Sinked,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        let statuses: Vec<_> = batch.iter().map(ConnectRecord::status).collect();
        assert_eq!(
            statuses,
            vec![RecordStatus::Failed, RecordStatus::Skipped, RecordStatus::Sinked]
        );
    }

    #[tokio::test]
    async fn cancellation_during_backoff_leaves_records_uncommitted() {
        let handler = RetriableHandler::new(
            RetryPolicy::new(
                3,
                Duration::from_secs(30),
                Duration::from_secs(30),
                BackoffStrategy::Fixed,
            ),
            Metrics::new(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut batch = batch(&["retriable-exception"]);

        let err = handler
            .retry(
                failing_work(Arc::new(AtomicUsize::new(0)), 5),
                &mut batch,
                "orders",
                RecordStatus::Sinked,
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(err.is_cancellation());
        assert!(!batch.records()[0].is_failed());
        assert!(!batch.records()[0].can_commit_offset());
    }

    #[tokio::test]
    async fn records_left_out_of_an_aggregate_take_the_success_status() {
        let mut batch = batch(&["orders", "orders", "orders"]);

        let result = handler(3)
            .retry(
                |batch: ConnectBatch| {
                    let failures = vec![RecordFailure::new(
                        batch.records()[1].position(),
                        ConnectError::data("rejected by the target"),
                    )];
                    std::future::ready(Err::<ConnectBatch, _>(ConnectError::Aggregate(failures)))
                },
                &mut batch,
                "orders",
                RecordStatus::Sinked,
                &CancellationToken::new(),
            )
            .await;

        assert!(result.is_ok());
        let state: Vec<_> = batch
            .iter()
            .map(|r| (r.offset, r.status(), r.can_commit_offset()))
            .collect();
        assert_eq!(
            state,
            vec![
                (0, RecordStatus::Sinked, true),
                (1, RecordStatus::Failed, false),
                (2, RecordStatus::Sinked, true),
            ]
        );
    }

    #[tokio::test]
    async fn cancelled_work_leaves_records_uncommitted() {
        let mut batch = batch(&["orders", "orders"]);

        let err = handler(3)
            .retry(
                |_batch: ConnectBatch| std::future::ready(Err(ConnectError::Cancelled)),
                &mut batch,
                "orders",
                RecordStatus::Sinked,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(err.is_cancellation());
        assert!(batch.iter().all(|r| !r.is_failed() && !r.can_commit_offset()));
    }
}
