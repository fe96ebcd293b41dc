use crate::error::DeadLetterError;
use chrono::Utc;
use engine_core::{connectors::broker::BrokerClientFactory, metrics::Metrics};
use model::{
    error::ConnectError,
    records::{message::Message, record::ConnectRecord},
};
use std::sync::Arc;
use tracing::{error, info};

pub const HEADER_CONNECTOR: &str = "connect.errors.connector";
pub const HEADER_TOPIC: &str = "connect.errors.topic";
pub const HEADER_PARTITION: &str = "connect.errors.partition";
pub const HEADER_OFFSET: &str = "connect.errors.offset";
pub const HEADER_KIND: &str = "connect.errors.kind";
pub const HEADER_MESSAGE: &str = "connect.errors.message";
pub const HEADER_TIMESTAMP: &str = "connect.errors.timestamp";

/// Republishes failed records, with their failure context, to a dead-letter topic.
#[derive(Clone)]
pub struct DeadLetterRouter {
    clients: Arc<dyn BrokerClientFactory>,
    metrics: Metrics,
}

impl DeadLetterRouter {
    pub fn new(clients: Arc<dyn BrokerClientFactory>, metrics: Metrics) -> Self {
        Self { clients, metrics }
    }

    /// Sends one message per record. A producer is created for the call and dropped after it.
    pub async fn send(
        &self,
        topic: &str,
        records: &[&ConnectRecord],
        err: &ConnectError,
        connector: &str,
    ) -> Result<usize, DeadLetterError> {
        if records.is_empty() {
            return Ok(0);
        }

        let producer = self
            .clients
            .producer(connector)
            .map_err(|source| DeadLetterError::Producer {
                connector: connector.to_string(),
                source,
            })?;

        let mut delivered = 0;
        let mut last_error = None;
        for record in records {
            let message = dead_letter_message(record, err, connector);
            match producer.produce(topic, message).await {
                Ok(position) => {
                    delivered += 1;
                    info!(
                        connector,
                        source = %record.position(),
                        topic = %position.topic,
                        partition = position.partition,
                        offset = position.offset,
                        "Record dead-lettered"
                    );
                }
                Err(e) => {
                    error!(connector, source = %record.position(), error = %e, "Dead-letter delivery failed");
                    last_error = Some(e);
                }
            }
        }

        self.metrics.increment_dead_letters(delivered as u64);
        match last_error {
            Some(source) => Err(DeadLetterError::Delivery {
                topic: topic.to_string(),
                failed: records.len() - delivered,
                total: records.len(),
                source,
            }),
            None => Ok(delivered),
        }
    }
}

fn dead_letter_message(record: &ConnectRecord, err: &ConnectError, connector: &str) -> Message {
    let mut message = record.message.clone();
    if message.value.is_none()
        && let Some(document) = &record.document
    {
        message.value = serde_json::to_vec(&document.value).ok();
    }

    let cause = record.error().unwrap_or(err);
    message
        .with_header(HEADER_CONNECTOR, connector)
        .with_header(HEADER_TOPIC, record.topic.as_str())
        .with_header(HEADER_PARTITION, record.partition.to_string())
        .with_header(HEADER_OFFSET, record.offset.to_string())
        .with_header(HEADER_KIND, format!("{:?}", cause.kind()))
        .with_header(HEADER_MESSAGE, cause.to_string())
        .with_header(HEADER_TIMESTAMP, Utc::now().to_rfc3339())
}
