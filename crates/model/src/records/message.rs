use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Serialized broker message, as consumed from or produced to a topic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<u8>>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(key: Option<Vec<u8>>, value: Option<Vec<u8>>) -> Self {
        Self {
            key,
            value,
            headers: BTreeMap::new(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn size_bytes(&self) -> usize {
        self.key.as_ref().map_or(0, Vec::len) + self.value.as_ref().map_or(0, Vec::len)
    }
}

/// Deserialized key/value pair handed to processors and plugins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub key: serde_json::Value,
    pub value: serde_json::Value,
}

impl Document {
    pub fn new(key: serde_json::Value, value: serde_json::Value) -> Self {
        Self { key, value }
    }
}
