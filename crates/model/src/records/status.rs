use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a record (or source command) as it moves through a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    #[default]
    Initial,
    Consumed,
    Processing,
    Processed,
    Sinking,
    Sinked,
    Sourcing,
    Sourced,
    Updated,
    Skipped,
    Published,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Initial => "Initial",
            RecordStatus::Consumed => "Consumed",
            RecordStatus::Processing => "Processing",
            RecordStatus::Processed => "Processed",
            RecordStatus::Sinking => "Sinking",
            RecordStatus::Sinked => "Sinked",
            RecordStatus::Sourcing => "Sourcing",
            RecordStatus::Sourced => "Sourced",
            RecordStatus::Updated => "Updated",
            RecordStatus::Skipped => "Skipped",
            RecordStatus::Published => "Published",
            RecordStatus::Failed => "Failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RecordStatus::Failed)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
