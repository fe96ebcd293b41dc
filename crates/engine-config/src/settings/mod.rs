pub mod batch;
pub mod connector;
pub mod eof;
pub mod errors;
pub mod failover;
pub mod restarts;
pub mod retry;
pub mod validator;
pub mod worker;

pub use batch::BatchConfig;
pub use connector::{ConnectorConfig, ConnectorKind};
pub use eof::EofConfig;
pub use errors::{ErrorTolerance, ErrorsConfig};
pub use failover::FailOverConfig;
pub use restarts::RestartsConfig;
pub use retry::{BackoffStrategy, RetryConfig};
pub use worker::{ConsumerSettings, WorkerConfig};
