use thiserror::Error;

/// Errors raised while loading or validating worker configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    #[error("Unknown connector: {0}")]
    UnknownConnector(String),
}
