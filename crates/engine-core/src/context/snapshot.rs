use crate::context::node::{ConnectorNode, NodeStatus, TaskNode, WorkerNode};
use chrono::{DateTime, Utc};
use model::records::partition::TopicPartition;
use serde::Serialize;

/// Running/paused/stopped tallies for one level of the tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub running: usize,
    pub paused: usize,
    pub stopped: usize,
    pub failed: usize,
}

impl StatusCounts {
    fn add(&mut self, status: NodeStatus) {
        self.total += 1;
        match status {
            NodeStatus::Running => self.running += 1,
            NodeStatus::Paused => self.paused += 1,
            NodeStatus::Stopped => self.stopped += 1,
            NodeStatus::Failed => self.failed += 1,
            NodeStatus::Initializing => {}
        }
    }
}

/// Summary read model for a status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub name: String,
    pub status: NodeStatus,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub restarts: u64,
    pub connectors: StatusCounts,
    pub tasks: StatusCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerDetails {
    pub name: String,
    pub status: NodeStatus,
    pub uptime_secs: i64,
    pub restarts: u64,
    pub connectors: Vec<ConnectorDetails>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectorDetails {
    pub name: String,
    pub status: NodeStatus,
    pub uptime_secs: i64,
    pub restart_attempts: u32,
    pub tasks: StatusCounts,
    pub task_details: Vec<TaskDetails>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskDetails {
    pub id: u32,
    pub status: NodeStatus,
    pub uptime_secs: i64,
    pub partitions: Vec<TopicPartition>,
    pub poll_index: u64,
    pub records: u64,
}

impl WorkerStatus {
    pub(crate) fn capture(worker: &WorkerNode) -> Self {
        let mut connectors = StatusCounts::default();
        let mut tasks = StatusCounts::default();
        for connector in worker.connectors() {
            connectors.add(connector.core.status());
            for task in connector.tasks() {
                tasks.add(task.core.status());
            }
        }

        Self {
            name: worker.name.clone(),
            status: worker.core.status(),
            started_at: worker.core.started_at(),
            uptime_secs: worker.core.uptime_secs(),
            restarts: worker.core.restart_requests(),
            connectors,
            tasks,
        }
    }
}

impl WorkerDetails {
    pub(crate) fn capture(worker: &WorkerNode) -> Self {
        Self {
            name: worker.name.clone(),
            status: worker.core.status(),
            uptime_secs: worker.core.uptime_secs(),
            restarts: worker.core.restart_requests(),
            connectors: worker
                .connectors()
                .iter()
                .map(|c| ConnectorDetails::capture(c))
                .collect(),
        }
    }
}

impl ConnectorDetails {
    fn capture(connector: &ConnectorNode) -> Self {
        let task_details: Vec<TaskDetails> = connector
            .tasks()
            .iter()
            .map(|t| TaskDetails::capture(t))
            .collect();
        let mut tasks = StatusCounts::default();
        for task in &task_details {
            tasks.add(task.status);
        }

        Self {
            name: connector.name.clone(),
            status: connector.core.status(),
            uptime_secs: connector.core.uptime_secs(),
            restart_attempts: connector.core.restart_attempts(),
            tasks,
            task_details,
        }
    }
}

impl TaskDetails {
    fn capture(task: &TaskNode) -> Self {
        Self {
            id: task.id,
            status: task.core.status(),
            uptime_secs: task.core.uptime_secs(),
            partitions: task.partitions(),
            poll_index: task.poll_index(),
            records: task.records(),
        }
    }
}
