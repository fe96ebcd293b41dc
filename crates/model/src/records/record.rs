use crate::{
    error::{ConnectError, RecordFailure},
    records::{
        message::{Document, Message},
        partition::TopicPartitionOffset,
        status::RecordStatus,
    },
};

/// A single record flowing through a sink or source task.
///
/// Sink records are created from a consumed broker message and carry its
/// coordinates. Source records start from a plugin document and receive their
/// coordinates once published.
#[derive(Debug, Clone)]
pub struct ConnectRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub message: Message,
    pub document: Option<Document>,
    status: RecordStatus,
    can_commit_offset: bool,
    error: Option<ConnectError>,
}

impl ConnectRecord {
    pub fn sink(position: TopicPartitionOffset, message: Message) -> Self {
        Self {
            topic: position.topic,
            partition: position.partition,
            offset: position.offset,
            message,
            document: None,
            status: RecordStatus::Consumed,
            can_commit_offset: true,
            error: None,
        }
    }

    pub fn source(topic: impl Into<String>, document: Document) -> Self {
        Self {
            topic: topic.into(),
            partition: -1,
            offset: -1,
            message: Message::default(),
            document: Some(document),
            status: RecordStatus::Initial,
            can_commit_offset: false,
            error: None,
        }
    }

    pub fn position(&self) -> TopicPartitionOffset {
        TopicPartitionOffset::new(self.topic.clone(), self.partition, self.offset)
    }

    pub fn status(&self) -> RecordStatus {
        self.status
    }

    pub fn set_status(&mut self, status: RecordStatus) {
        self.status = status;
    }

    pub fn can_commit_offset(&self) -> bool {
        self.can_commit_offset
    }

    pub fn set_can_commit_offset(&mut self, can_commit: bool) {
        self.can_commit_offset = can_commit;
    }

    pub fn error(&self) -> Option<&ConnectError> {
        self.error.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.status.is_failed()
    }

    /// Marks the record failed. A failed record holds back the offset commit
    /// for its partition until the failure is tolerated.
    pub fn fail(&mut self, error: ConnectError) {
        self.status = RecordStatus::Failed;
        self.can_commit_offset = false;
        self.error = Some(error);
    }

    /// Clears a previous failure so the record can be attempted again.
    pub fn reset(&mut self, status: RecordStatus) {
        self.status = status;
        self.can_commit_offset = true;
        self.error = None;
    }

    pub fn failure(&self) -> Option<RecordFailure> {
        self.error
            .as_ref()
            .map(|e| RecordFailure::new(self.position(), e.clone()))
    }

    /// Records the delivery coordinates of a published source record.
    pub fn published(&mut self, delivered: TopicPartitionOffset) {
        self.topic = delivered.topic;
        self.partition = delivered.partition;
        self.offset = delivered.offset;
        self.status = RecordStatus::Published;
    }
}
