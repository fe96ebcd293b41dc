use engine_config::error::ConfigError;
use model::error::ConnectError;
use thiserror::Error;

/// Top-level errors of the connector runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A task could not resolve its connector, plugin or processors.
    #[error("Setup of {connector}#{task} failed: {source}")]
    Setup {
        connector: String,
        task: u32,
        #[source]
        source: ConnectError,
    },

    /// An error occurred while joining a task.
    /// This usually indicates that the task panicked.
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// Setting error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging initialization failed: {0}")]
    Logging(String),

    #[error(transparent)]
    Connect(#[from] ConnectError),
}
