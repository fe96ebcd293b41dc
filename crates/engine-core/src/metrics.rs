use serde::Serialize;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    records_processed: AtomicU64,
    bytes_transferred: AtomicU64,
    batches_processed: AtomicU64,
    failure_count: AtomicU64,
    retry_count: AtomicU64,
    dead_letter_count: AtomicU64,
    eof_signals: AtomicU64,
}

/// Pipeline counters shared by the tasks of a worker.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub records_processed: u64,
    pub bytes_transferred: u64,
    pub batches_processed: u64,
    pub failure_count: u64,
    pub retry_count: u64,
    pub dead_letter_count: u64,
    pub eof_signals: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    pub fn increment_records(&self, count: u64) {
        self.inner
            .records_processed
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_bytes(&self, count: u64) {
        self.inner
            .bytes_transferred
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_batches(&self, count: u64) {
        self.inner
            .batches_processed
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_failures(&self, count: u64) {
        self.inner.failure_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_retries(&self, count: u64) {
        self.inner.retry_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_dead_letters(&self, count: u64) {
        self.inner
            .dead_letter_count
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_eof_signals(&self, count: u64) {
        self.inner.eof_signals.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_processed: self.inner.records_processed.load(Ordering::Relaxed),
            bytes_transferred: self.inner.bytes_transferred.load(Ordering::Relaxed),
            batches_processed: self.inner.batches_processed.load(Ordering::Relaxed),
            failure_count: self.inner.failure_count.load(Ordering::Relaxed),
            retry_count: self.inner.retry_count.load(Ordering::Relaxed),
            dead_letter_count: self.inner.dead_letter_count.load(Ordering::Relaxed),
            eof_signals: self.inner.eof_signals.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let metrics = Metrics::new();
        let clone = metrics.clone();

        metrics.increment_records(3);
        clone.increment_records(2);
        clone.increment_dead_letters(1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.records_processed, 5);
        assert_eq!(snapshot.dead_letter_count, 1);
        assert_eq!(snapshot.retry_count, 0);
    }
}
