use async_trait::async_trait;
use engine_core::connectors::broker::{
    BrokerAdmin, BrokerClientFactory, BrokerConsumer, BrokerProducer, ConsumeResult,
    DeliveryResult,
};
use model::{
    error::ConnectError,
    records::{message::Message, partition::TopicPartitionOffset, record::ConnectRecord},
};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct Log {
    pub committed: Vec<TopicPartitionOffset>,
    pub stored: Vec<TopicPartitionOffset>,
    pub subscribed: Vec<String>,
    pub closed: bool,
}

/// Consumer replaying scripted events. Shares its log with the test.
#[derive(Default, Clone)]
pub struct ScriptedConsumer {
    pub events: Arc<Mutex<VecDeque<ConsumeResult>>>,
    pub log: Arc<Mutex<Log>>,
    pub fail_subscribe: bool,
}

impl ScriptedConsumer {
    pub fn with_events(events: Vec<ConsumeResult>) -> Self {
        Self {
            events: Arc::new(Mutex::new(events.into())),
            ..Self::default()
        }
    }
}

#[async_trait]
impl BrokerConsumer for ScriptedConsumer {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), ConnectError> {
        if self.fail_subscribe {
            return Err(ConnectError::retriable("subscribe refused"));
        }
        self.log.lock().unwrap().subscribed.extend_from_slice(topics);
        Ok(())
    }

    async fn consume(
        &mut self,
        _: Duration,
        _: &CancellationToken,
    ) -> Result<Option<ConsumeResult>, ConnectError> {
        Ok(self.events.lock().unwrap().pop_front())
    }

    async fn commit(&mut self, offsets: &[TopicPartitionOffset]) -> Result<(), ConnectError> {
        self.log.lock().unwrap().committed.extend_from_slice(offsets);
        Ok(())
    }

    fn store_offset(&mut self, offset: &TopicPartitionOffset) -> Result<(), ConnectError> {
        self.log.lock().unwrap().stored.push(offset.clone());
        Ok(())
    }

    async fn close(&mut self) {
        self.log.lock().unwrap().closed = true;
    }
}

#[derive(Default)]
pub struct RecordingProducer {
    pub sent: Mutex<Vec<(String, Message)>>,
}

impl RecordingProducer {
    pub fn sent_to(&self, topic: &str) -> Vec<Message> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl BrokerProducer for RecordingProducer {
    async fn produce(&self, topic: &str, message: Message) -> Result<DeliveryResult, ConnectError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((topic.to_string(), message));
        Ok(TopicPartitionOffset::new(topic, 0, sent.len() as i64 - 1))
    }
}

pub struct Clients {
    pub consumer: ScriptedConsumer,
    pub producer: Option<Arc<RecordingProducer>>,
}

impl Clients {
    pub fn new(consumer: ScriptedConsumer, producer: Option<Arc<RecordingProducer>>) -> Arc<Self> {
        Arc::new(Self { consumer, producer })
    }
}

impl BrokerClientFactory for Clients {
    fn consumer(&self, _: &str, _: u32) -> Result<Box<dyn BrokerConsumer>, ConnectError> {
        Ok(Box::new(self.consumer.clone()))
    }

    fn producer(&self, _: &str) -> Result<Arc<dyn BrokerProducer>, ConnectError> {
        match &self.producer {
            Some(p) => Ok(Arc::clone(p) as Arc<dyn BrokerProducer>),
            None => Err(ConnectError::retriable("broker unreachable")),
        }
    }

    fn admin(&self) -> Result<Arc<dyn BrokerAdmin>, ConnectError> {
        Err(ConnectError::fatal("not available"))
    }
}

pub fn message(value: &str) -> Message {
    Message::new(None, Some(value.as_bytes().to_vec()))
}

pub fn record(topic: &str, partition: i32, offset: i64) -> ConnectRecord {
    ConnectRecord::sink(
        TopicPartitionOffset::new(topic, partition, offset),
        message("{}"),
    )
}
