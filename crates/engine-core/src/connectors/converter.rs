use model::{
    error::ConnectError,
    records::message::{Document, Message},
};
use serde_json::Value;

/// Turns broker bytes into documents and back.
pub trait MessageConverter: Send + Sync {
    fn deserialize(&self, topic: &str, message: &Message) -> Result<Document, ConnectError>;

    fn serialize(&self, topic: &str, document: &Document) -> Result<Message, ConnectError>;
}

/// Plain JSON keys and values. Missing parts map to `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConverter;

impl JsonConverter {
    fn decode(topic: &str, bytes: Option<&[u8]>) -> Result<Value, ConnectError> {
        match bytes {
            None => Ok(Value::Null),
            Some(bytes) if bytes.is_empty() => Ok(Value::Null),
            Some(bytes) => serde_json::from_slice(bytes)
                .map_err(|e| ConnectError::data(format!("Invalid JSON on '{topic}': {e}"))),
        }
    }

    fn encode(topic: &str, value: &Value) -> Result<Option<Vec<u8>>, ConnectError> {
        if value.is_null() {
            return Ok(None);
        }
        serde_json::to_vec(value)
            .map(Some)
            .map_err(|e| ConnectError::data(format!("Cannot encode JSON for '{topic}': {e}")))
    }
}

impl MessageConverter for JsonConverter {
    fn deserialize(&self, topic: &str, message: &Message) -> Result<Document, ConnectError> {
        Ok(Document::new(
            Self::decode(topic, message.key.as_deref())?,
            Self::decode(topic, message.value.as_deref())?,
        ))
    }

    fn serialize(&self, topic: &str, document: &Document) -> Result<Message, ConnectError> {
        Ok(Message::new(
            Self::encode(topic, &document.key)?,
            Self::encode(topic, &document.value)?,
        ))
    }
}
