use crate::{
    error::ConnectError,
    records::{message::Message, partition::TopicPartitionOffset, status::RecordStatus},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unit of source work (e.g. one table to poll) kept on a command topic.
///
/// The latest message per command name is the current state of the command;
/// source tasks republish it after every run with the plugin's updated cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub name: String,
    pub connector: String,
    #[serde(default)]
    pub status: RecordStatus,
    pub batch_size: usize,
    #[serde(default)]
    pub command: serde_json::Value,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Where this state was read from. Not part of the persisted payload.
    #[serde(skip)]
    pub position: Option<TopicPartitionOffset>,
}

impl CommandRecord {
    pub fn new(
        name: impl Into<String>,
        connector: impl Into<String>,
        batch_size: usize,
        command: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            connector: connector.into(),
            status: RecordStatus::Initial,
            batch_size,
            command,
            updated_at: None,
            position: None,
        }
    }

    pub fn to_message(&self) -> Result<Message, ConnectError> {
        let value = serde_json::to_vec(self)
            .map_err(|e| ConnectError::data(format!("command '{}': {e}", self.name)))?;
        Ok(Message::new(Some(self.name.as_bytes().to_vec()), Some(value)))
    }

    pub fn from_message(
        message: &Message,
        position: TopicPartitionOffset,
    ) -> Result<Self, ConnectError> {
        let value = message
            .value
            .as_deref()
            .ok_or_else(|| ConnectError::data(format!("empty command at {position}")))?;
        let mut command: CommandRecord = serde_json::from_slice(value)
            .map_err(|e| ConnectError::data(format!("command at {position}: {e}")))?;
        command.position = Some(position);
        Ok(command)
    }
}
