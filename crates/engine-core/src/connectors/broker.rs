use async_trait::async_trait;
use model::{
    error::ConnectError,
    records::{
        message::Message,
        partition::{TopicPartition, TopicPartitionOffset},
    },
};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

/// One event pulled from the broker.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumeResult {
    Message {
        position: TopicPartitionOffset,
        message: Message,
    },
    /// No more immediately available records; the offset is the next one to read.
    EndOfPartition(TopicPartitionOffset),
    Assigned(Vec<TopicPartition>),
    Revoked(Vec<TopicPartition>),
}

/// Where a produced message landed.
pub type DeliveryResult = TopicPartitionOffset;

/// Consumer handle owned by a single task.
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), ConnectError>;

    /// Waits up to `timeout` for the next event. `Ok(None)` is a timeout, not an error.
    async fn consume(
        &mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<ConsumeResult>, ConnectError>;

    /// Commits the given next-to-read offsets.
    async fn commit(&mut self, offsets: &[TopicPartitionOffset]) -> Result<(), ConnectError>;

    /// Stores an offset for the client's own auto-commit.
    fn store_offset(&mut self, offset: &TopicPartitionOffset) -> Result<(), ConnectError>;

    async fn close(&mut self);
}

#[async_trait]
pub trait BrokerProducer: Send + Sync {
    async fn produce(&self, topic: &str, message: Message) -> Result<DeliveryResult, ConnectError>;
}

#[async_trait]
pub trait BrokerAdmin: Send + Sync {
    /// Fetches cluster metadata for the topics; used as a broker health check.
    async fn metadata(&self, topics: &[String]) -> Result<(), ConnectError>;
}

/// Creates broker handles. Each call yields a handle exclusively owned by the caller.
pub trait BrokerClientFactory: Send + Sync {
    fn consumer(&self, connector: &str, task: u32) -> Result<Box<dyn BrokerConsumer>, ConnectError>;

    fn producer(&self, connector: &str) -> Result<Arc<dyn BrokerProducer>, ConnectError>;

    fn admin(&self) -> Result<Arc<dyn BrokerAdmin>, ConnectError>;
}
