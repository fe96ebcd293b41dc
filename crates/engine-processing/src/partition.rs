use engine_config::settings::{ConsumerSettings, EofConfig};
use engine_core::{
    connectors::broker::{BrokerClientFactory, BrokerConsumer},
    metrics::Metrics,
};
use model::{
    error::ConnectError,
    records::{batch::ConnectBatch, message::Message, partition::TopicPartitionOffset},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How offsets reach the broker for a given consumer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    Commit,
    StoreOffset,
    None,
}

impl From<ConsumerSettings> for CommitMode {
    fn from(settings: ConsumerSettings) -> Self {
        match (settings.enable_auto_commit, settings.enable_auto_offset_store) {
            (true, false) => CommitMode::StoreOffset,
            (true, true) => CommitMode::None,
            (false, _) => CommitMode::Commit,
        }
    }
}

/// Marker published when a partition is drained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndOfPartitionSignal {
    pub connector: String,
    pub task_id: u32,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Next offset to resume from per topic-partition. Records are walked in
/// consumption order; a partition stops at its first record that may not be
/// committed.
pub fn committable_offsets(batch: &ConnectBatch) -> Vec<TopicPartitionOffset> {
    let mut next: BTreeMap<(String, i32), i64> = BTreeMap::new();
    let mut blocked: BTreeSet<(String, i32)> = BTreeSet::new();

    for record in batch.iter().filter(|r| r.offset >= 0) {
        let key = (record.topic.clone(), record.partition);
        if blocked.contains(&key) {
            continue;
        }
        if record.can_commit_offset() {
            let offset = next.entry(key).or_insert(record.offset + 1);
            *offset = (*offset).max(record.offset + 1);
        } else {
            blocked.insert(key);
        }
    }

    next.into_iter()
        .map(|((topic, partition), offset)| TopicPartitionOffset::new(topic, partition, offset))
        .collect()
}

#[derive(Clone)]
pub struct PartitionHandler {
    mode: CommitMode,
    clients: Arc<dyn BrokerClientFactory>,
    metrics: Metrics,
}

impl PartitionHandler {
    pub fn new(
        settings: ConsumerSettings,
        clients: Arc<dyn BrokerClientFactory>,
        metrics: Metrics,
    ) -> Self {
        Self {
            mode: CommitMode::from(settings),
            clients,
            metrics,
        }
    }

    pub fn mode(&self) -> CommitMode {
        self.mode
    }

    /// Commits or stores the batch's committable offsets. Returns what was handed to the broker.
    pub async fn commit_offsets(
        &self,
        batch: &ConnectBatch,
        consumer: &mut dyn BrokerConsumer,
    ) -> Result<Vec<TopicPartitionOffset>, ConnectError> {
        let offsets = committable_offsets(batch);
        if offsets.is_empty() {
            return Ok(offsets);
        }

        match self.mode {
            CommitMode::Commit => consumer.commit(&offsets).await?,
            CommitMode::StoreOffset => {
                for offset in &offsets {
                    consumer.store_offset(offset)?;
                }
            }
            CommitMode::None => return Ok(Vec::new()),
        }

        debug!(connector = %batch.connector, mode = ?self.mode, offsets = offsets.len(), "Offsets committed");
        Ok(offsets)
    }

    /// Publishes one marker per drained partition whose EOF offset matches
    /// an offset `committed` for this batch. Failures are logged, never raised.
    pub async fn notify_end_of_partition(
        &self,
        batch: &ConnectBatch,
        committed: &[TopicPartitionOffset],
        connector: &str,
        task: u32,
        eof: &EofConfig,
    ) -> usize {
        let Some(topic) = eof.signal_topic() else {
            return 0;
        };
        if !batch.has_eof() || committed.is_empty() {
            return 0;
        }

        let drained: Vec<TopicPartitionOffset> = batch
            .eof_partitions()
            .into_iter()
            .filter(|eof| committed.contains(eof))
            .collect();
        if drained.is_empty() {
            return 0;
        }

        let producer = match self.clients.producer(connector) {
            Ok(producer) => producer,
            Err(err) => {
                warn!(connector, error = %err, "No producer for end-of-partition signal");
                return 0;
            }
        };

        let mut published = 0;
        for position in drained {
            let signal = EndOfPartitionSignal {
                connector: connector.to_string(),
                task_id: task,
                topic: position.topic.clone(),
                partition: position.partition,
                offset: position.offset,
            };
            let payload = match serde_json::to_vec(&signal) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(connector, error = %err, "Cannot encode end-of-partition signal");
                    continue;
                }
            };
            let key = Uuid::new_v4().to_string().into_bytes();
            let message = Message::new(Some(key), Some(payload));

            match producer.produce(topic, message).await {
                Ok(delivered) => {
                    published += 1;
                    info!(connector, task, partition = %position, delivered = %delivered, "End of partition signalled");
                }
                Err(err) => {
                    warn!(connector, task, partition = %position, error = %err, "End-of-partition signal not delivered");
                }
            }
        }

        self.metrics.increment_eof_signals(published as u64);
        published
    }
}
