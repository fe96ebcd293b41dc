use model::error::ConnectError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeadLetterError {
    #[error("Failed to create dead-letter producer for '{connector}': {source}")]
    Producer {
        connector: String,
        #[source]
        source: ConnectError,
    },

    #[error("Failed to deliver {failed} of {total} record(s) to '{topic}': {source}")]
    Delivery {
        topic: String,
        failed: usize,
        total: usize,
        #[source]
        source: ConnectError,
    },
}
