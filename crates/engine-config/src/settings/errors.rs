use serde::{Deserialize, Serialize};

/// Whether processing failures are swallowed or stop the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorTolerance {
    #[default]
    None,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorsConfig {
    pub tolerance: ErrorTolerance,
    /// Dead-letter topic. Dead-lettering is disabled when absent or empty.
    pub topic: Option<String>,
}

impl ErrorsConfig {
    pub fn tolerates(&self) -> bool {
        self.tolerance == ErrorTolerance::All
    }

    pub fn dead_letter_topic(&self) -> Option<&str> {
        self.topic.as_deref().filter(|t| !t.trim().is_empty())
    }
}
