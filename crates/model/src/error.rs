use crate::records::partition::TopicPartitionOffset;
use std::fmt;
use thiserror::Error;

/// Classification used to decide whether a failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Retriable,
    Data,
    ToleranceExceeded,
    Aggregate,
    Cancelled,
    Fatal,
}

/// Errors raised by the pipeline and by plugin/broker collaborators.
#[derive(Debug, Clone, Error)]
pub enum ConnectError {
    /// Transient failure, safe to reattempt.
    #[error("Retriable error: {0}")]
    Retriable(String),

    /// Payload, schema or business-rule failure.
    #[error("Data error: {0}")]
    Data(String),

    /// Retry budget exhausted. Carries every failure observed across attempts.
    #[error("Tolerance exceeded after {} error(s)", .0.len())]
    ToleranceExceeded(Vec<ConnectError>),

    /// One failure per record of a partially failed batch.
    #[error("{} record(s) failed", .0.len())]
    Aggregate(Vec<RecordFailure>),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl ConnectError {
    pub fn retriable(msg: impl Into<String>) -> Self {
        ConnectError::Retriable(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        ConnectError::Data(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        ConnectError::Fatal(msg.into())
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ConnectError::Retriable(_) => FailureKind::Retriable,
            ConnectError::Data(_) => FailureKind::Data,
            ConnectError::ToleranceExceeded(_) => FailureKind::ToleranceExceeded,
            ConnectError::Aggregate(_) => FailureKind::Aggregate,
            ConnectError::Cancelled => FailureKind::Cancelled,
            ConnectError::Fatal(_) => FailureKind::Fatal,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.kind() == FailureKind::Retriable
    }

    /// True when the failure only reflects a cooperative shutdown.
    pub fn is_cancellation(&self) -> bool {
        match self {
            ConnectError::Cancelled => true,
            ConnectError::ToleranceExceeded(inner) => {
                !inner.is_empty() && inner.iter().all(ConnectError::is_cancellation)
            }
            ConnectError::Aggregate(inner) => {
                !inner.is_empty() && inner.iter().all(|f| f.error.is_cancellation())
            }
            _ => false,
        }
    }

    /// Flattens aggregate and tolerance wrappers down to the leaf failures.
    pub fn leaves(&self) -> Vec<&ConnectError> {
        match self {
            ConnectError::ToleranceExceeded(inner) => {
                inner.iter().flat_map(ConnectError::leaves).collect()
            }
            ConnectError::Aggregate(inner) => inner.iter().flat_map(|f| f.error.leaves()).collect(),
            other => vec![other],
        }
    }
}

/// The failure of one record, identified by its broker coordinates.
#[derive(Debug, Clone)]
pub struct RecordFailure {
    pub position: TopicPartitionOffset,
    pub error: ConnectError,
}

impl RecordFailure {
    pub fn new(position: TopicPartitionOffset, error: ConnectError) -> Self {
        Self { position, error }
    }
}

impl fmt::Display for RecordFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.position, self.error)
    }
}
