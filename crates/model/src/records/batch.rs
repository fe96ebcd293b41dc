use crate::{
    error::{ConnectError, RecordFailure},
    records::{
        partition::{TopicPartition, TopicPartitionOffset},
        record::ConnectRecord,
    },
};
use std::collections::BTreeMap;

/// Records pulled by one poll iteration, in consumption order.
#[derive(Debug, Clone, Default)]
pub struct ConnectBatch {
    pub connector: String,
    records: Vec<ConnectRecord>,
    eof: BTreeMap<TopicPartition, i64>,
}

impl ConnectBatch {
    pub fn new(connector: impl Into<String>) -> Self {
        Self {
            connector: connector.into(),
            records: Vec::new(),
            eof: BTreeMap::new(),
        }
    }

    pub fn from_records(connector: impl Into<String>, records: Vec<ConnectRecord>) -> Self {
        Self {
            connector: connector.into(),
            records,
            eof: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, record: ConnectRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ConnectRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [ConnectRecord] {
        &mut self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectRecord> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ConnectRecord> {
        self.records.iter_mut()
    }

    pub fn into_records(self) -> Vec<ConnectRecord> {
        self.records
    }

    /// Replaces the records while keeping the connector and EOF bookkeeping.
    pub fn with_records(self, records: Vec<ConnectRecord>) -> Self {
        Self { records, ..self }
    }

    /// Records that a partition reached its end during this poll. A later
    /// signal for the same partition replaces the earlier one.
    pub fn mark_eof(&mut self, position: TopicPartitionOffset) {
        self.eof
            .insert(position.topic_partition(), position.offset);
    }

    pub fn has_eof(&self) -> bool {
        !self.eof.is_empty()
    }

    pub fn eof_partitions(&self) -> Vec<TopicPartitionOffset> {
        self.eof
            .iter()
            .map(|(tp, offset)| {
                TopicPartitionOffset::new(tp.topic.clone(), tp.partition, *offset)
            })
            .collect()
    }

    /// Highest offset seen per topic-partition, regardless of record status.
    pub fn highest_offsets(&self) -> BTreeMap<TopicPartition, i64> {
        let mut highest = BTreeMap::new();
        for record in &self.records {
            highest
                .entry(TopicPartition::new(record.topic.clone(), record.partition))
                .and_modify(|o: &mut i64| *o = (*o).max(record.offset))
                .or_insert(record.offset);
        }
        highest
    }

    pub fn failed(&self) -> impl Iterator<Item = &ConnectRecord> {
        self.records.iter().filter(|r| r.is_failed())
    }

    pub fn has_failures(&self) -> bool {
        self.records.iter().any(ConnectRecord::is_failed)
    }

    pub fn failures(&self) -> Vec<RecordFailure> {
        self.records.iter().filter_map(ConnectRecord::failure).collect()
    }

    /// Surfaces per-record failures as a single aggregate at the batch boundary.
    pub fn failure_error(&self) -> Option<ConnectError> {
        let failures = self.failures();
        (!failures.is_empty()).then_some(ConnectError::Aggregate(failures))
    }

    /// Lets the offsets of failed records be committed once their failure has
    /// been tolerated (dead-lettered or skipped).
    pub fn tolerate_failures(&mut self) {
        for record in self.records.iter_mut().filter(|r| r.is_failed()) {
            record.set_can_commit_offset(true);
        }
    }
}
