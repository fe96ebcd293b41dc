use serde::{Deserialize, Serialize};

/// End-of-partition signalling.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EofConfig {
    pub enabled: bool,
    pub topic: Option<String>,
}

impl EofConfig {
    /// The signal topic, only when signalling is enabled and a topic is set.
    pub fn signal_topic(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        self.topic.as_deref().filter(|t| !t.trim().is_empty())
    }
}
