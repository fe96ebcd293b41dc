use async_trait::async_trait;
use engine_core::connectors::broker::{
    BrokerAdmin, BrokerClientFactory, BrokerConsumer, BrokerProducer, ConsumeResult,
    DeliveryResult,
};
use model::{
    error::ConnectError,
    records::{
        message::Message,
        partition::{TopicPartition, TopicPartitionOffset},
    },
};
use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::{sync::Notify, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Every topic has a single partition.
const PARTITION: i32 = 0;

#[derive(Default)]
struct BrokerState {
    topics: BTreeMap<String, Vec<Message>>,
    /// Next offset to read, per consumer group and topic.
    committed: BTreeMap<(String, String), i64>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<BrokerState>,
    appended: Notify,
    metadata_down: AtomicBool,
    metadata_calls: AtomicUsize,
    refuse_subscriptions: AtomicBool,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process broker with one consumer group per connector.
///
/// Consumers resume from their group's committed offset, report the end of
/// a partition once per position and wake up as soon as anything is produced.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clients(&self) -> Arc<dyn BrokerClientFactory> {
        Arc::new(self.clone())
    }

    /// Appends a message and returns its offset.
    pub fn append(&self, topic: &str, message: Message) -> i64 {
        let offset = {
            let mut state = self.shared.state();
            let log = state.topics.entry(topic.to_string()).or_default();
            log.push(message);
            log.len() as i64 - 1
        };
        self.shared.appended.notify_waiters();
        offset
    }

    pub fn messages(&self, topic: &str) -> Vec<Message> {
        self.shared
            .state()
            .topics
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    pub fn committed(&self, group: &str, topic: &str) -> Option<i64> {
        self.shared
            .state()
            .committed
            .get(&(group.to_string(), topic.to_string()))
            .copied()
    }

    pub fn set_metadata_available(&self, available: bool) {
        self.shared.metadata_down.store(!available, Ordering::SeqCst);
    }

    pub fn metadata_calls(&self) -> usize {
        self.shared.metadata_calls.load(Ordering::SeqCst)
    }

    pub fn refuse_subscriptions(&self) {
        self.shared.refuse_subscriptions.store(true, Ordering::SeqCst);
    }
}

impl BrokerClientFactory for MemoryBroker {
    fn consumer(&self, connector: &str, _: u32) -> Result<Box<dyn BrokerConsumer>, ConnectError> {
        Ok(Box::new(MemoryConsumer {
            shared: Arc::clone(&self.shared),
            group: connector.to_string(),
            topics: Vec::new(),
            positions: BTreeMap::new(),
            eof_at: BTreeMap::new(),
            assigned: false,
        }))
    }

    fn producer(&self, _: &str) -> Result<Arc<dyn BrokerProducer>, ConnectError> {
        Ok(Arc::new(self.clone()))
    }

    fn admin(&self) -> Result<Arc<dyn BrokerAdmin>, ConnectError> {
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl BrokerProducer for MemoryBroker {
    async fn produce(&self, topic: &str, message: Message) -> Result<DeliveryResult, ConnectError> {
        let offset = self.append(topic, message);
        Ok(TopicPartitionOffset::new(topic, PARTITION, offset))
    }
}

#[async_trait]
impl BrokerAdmin for MemoryBroker {
    async fn metadata(&self, topics: &[String]) -> Result<(), ConnectError> {
        self.shared.metadata_calls.fetch_add(1, Ordering::SeqCst);
        if self.shared.metadata_down.load(Ordering::SeqCst) {
            return Err(ConnectError::retriable(format!(
                "metadata for {topics:?} unavailable"
            )));
        }
        Ok(())
    }
}

pub struct MemoryConsumer {
    shared: Arc<Shared>,
    group: String,
    topics: Vec<String>,
    positions: BTreeMap<String, i64>,
    eof_at: BTreeMap<String, i64>,
    assigned: bool,
}

impl MemoryConsumer {
    fn next_event(&mut self) -> Option<ConsumeResult> {
        if !self.assigned {
            self.assigned = true;
            let partitions = self
                .topics
                .iter()
                .map(|t| TopicPartition::new(t.as_str(), PARTITION))
                .collect();
            return Some(ConsumeResult::Assigned(partitions));
        }

        let state = self.shared.state();
        for topic in &self.topics {
            let log = state.topics.get(topic).map_or(&[][..], Vec::as_slice);
            let position = self.positions.entry(topic.clone()).or_insert(0);

            if let Some(message) = log.get(*position as usize) {
                let at = TopicPartitionOffset::new(topic.as_str(), PARTITION, *position);
                *position += 1;
                return Some(ConsumeResult::Message {
                    position: at,
                    message: message.clone(),
                });
            }
            if self.eof_at.get(topic) != Some(&*position) {
                self.eof_at.insert(topic.clone(), *position);
                return Some(ConsumeResult::EndOfPartition(TopicPartitionOffset::new(
                    topic.as_str(),
                    PARTITION,
                    *position,
                )));
            }
        }
        None
    }

    fn save(&self, offset: &TopicPartitionOffset) {
        self.shared
            .state()
            .committed
            .insert((self.group.clone(), offset.topic.clone()), offset.offset);
    }
}

#[async_trait]
impl BrokerConsumer for MemoryConsumer {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), ConnectError> {
        if self.shared.refuse_subscriptions.load(Ordering::SeqCst) {
            return Err(ConnectError::retriable("group coordinator not available"));
        }

        let state = self.shared.state();
        self.positions = topics
            .iter()
            .map(|topic| {
                let committed = state
                    .committed
                    .get(&(self.group.clone(), topic.clone()))
                    .copied()
                    .unwrap_or(0);
                (topic.clone(), committed)
            })
            .collect();
        drop(state);

        self.topics = topics.to_vec();
        self.eof_at.clear();
        self.assigned = false;
        debug!(group = %self.group, ?topics, "Memory consumer subscribed");
        Ok(())
    }

    async fn consume(
        &mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<ConsumeResult>, ConnectError> {
        let deadline = Instant::now() + timeout;
        let shared = Arc::clone(&self.shared);

        loop {
            let appended = shared.appended.notified();
            if let Some(event) = self.next_event() {
                return Ok(Some(event));
            }

            tokio::select! {
                _ = appended => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
                _ = cancel.cancelled() => return Ok(None),
            }
        }
    }

    async fn commit(&mut self, offsets: &[TopicPartitionOffset]) -> Result<(), ConnectError> {
        for offset in offsets {
            self.save(offset);
        }
        Ok(())
    }

    fn store_offset(&mut self, offset: &TopicPartitionOffset) -> Result<(), ConnectError> {
        self.save(offset);
        Ok(())
    }

    async fn close(&mut self) {
        debug!(group = %self.group, "Memory consumer closed");
    }
}
