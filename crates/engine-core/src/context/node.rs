use crate::context::{pause::PauseGate, poll::BatchPollContext, restart::RestartContext};
use chrono::{DateTime, Utc};
use engine_config::settings::RestartsConfig;
use model::records::partition::TopicPartition;
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::{
        Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Initializing,
    Running,
    Paused,
    Stopped,
    Failed,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Initializing => "initializing",
            NodeStatus::Running => "running",
            NodeStatus::Paused => "paused",
            NodeStatus::Stopped => "stopped",
            NodeStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct Lifecycle {
    status: NodeStatus,
    started_at: DateTime<Utc>,
    token: CancellationToken,
}

/// State every node of the tree carries.
#[derive(Debug)]
pub struct NodeCore {
    lifecycle: RwLock<Lifecycle>,
    pub(crate) gate: PauseGate,
    pub(crate) restart: RestartContext,
    restart_requested: AtomicBool,
    restart_requests: AtomicU64,
}

impl NodeCore {
    fn new(restarts: &RestartsConfig, token: CancellationToken) -> Self {
        Self {
            lifecycle: RwLock::new(Lifecycle {
                status: NodeStatus::Initializing,
                started_at: Utc::now(),
                token,
            }),
            gate: PauseGate::default(),
            restart: RestartContext::new(restarts),
            restart_requested: AtomicBool::new(false),
            restart_requests: AtomicU64::new(0),
        }
    }

    /// Starts a new cycle on the node. Pause state and restart budget survive.
    fn refresh(&self, token: CancellationToken) {
        let mut lifecycle = write(&self.lifecycle);
        lifecycle.status = NodeStatus::Initializing;
        lifecycle.started_at = Utc::now();
        lifecycle.token = token;
        self.restart_requested.store(false, Ordering::SeqCst);
    }

    pub fn status(&self) -> NodeStatus {
        let status = read(&self.lifecycle).status;
        if self.gate.is_paused() && status == NodeStatus::Running {
            NodeStatus::Paused
        } else {
            status
        }
    }

    pub fn set_status(&self, status: NodeStatus) {
        write(&self.lifecycle).status = status;
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        read(&self.lifecycle).started_at
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at()).num_seconds().max(0)
    }

    pub fn token(&self) -> CancellationToken {
        read(&self.lifecycle).token.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    /// Flags the node for restart and cancels its current cycle.
    pub(crate) fn request_restart(&self) {
        self.restart_requested.store(true, Ordering::SeqCst);
        self.restart_requests.fetch_add(1, Ordering::SeqCst);
        self.token().cancel();
    }

    pub(crate) fn take_restart_request(&self) -> bool {
        self.restart_requested.swap(false, Ordering::SeqCst)
    }

    pub fn restart_requests(&self) -> u64 {
        self.restart_requests.load(Ordering::SeqCst)
    }

    pub fn restart_attempts(&self) -> u32 {
        self.restart.attempts_used()
    }
}

#[derive(Debug)]
pub struct WorkerNode {
    pub name: String,
    pub core: NodeCore,
    pub(crate) connectors: RwLock<BTreeMap<String, Arc<ConnectorNode>>>,
}

impl WorkerNode {
    pub(crate) fn new(name: &str, restarts: &RestartsConfig, token: CancellationToken) -> Self {
        Self {
            name: name.to_string(),
            core: NodeCore::new(restarts, token),
            connectors: RwLock::new(BTreeMap::new()),
        }
    }

    pub(crate) fn refresh(&self, token: CancellationToken) {
        self.core.refresh(token);
        write(&self.connectors).clear();
    }

    pub fn connector(&self, name: &str) -> Option<Arc<ConnectorNode>> {
        read(&self.connectors).get(name).cloned()
    }

    pub fn connectors(&self) -> Vec<Arc<ConnectorNode>> {
        read(&self.connectors).values().cloned().collect()
    }
}

#[derive(Debug)]
pub struct ConnectorNode {
    pub name: String,
    pub core: NodeCore,
    pub(crate) tasks: RwLock<BTreeMap<u32, Arc<TaskNode>>>,
}

impl ConnectorNode {
    pub(crate) fn new(name: &str, restarts: &RestartsConfig, token: CancellationToken) -> Self {
        Self {
            name: name.to_string(),
            core: NodeCore::new(restarts, token),
            tasks: RwLock::new(BTreeMap::new()),
        }
    }

    pub(crate) fn refresh(&self, token: CancellationToken) {
        self.core.refresh(token);
        write(&self.tasks).clear();
    }

    pub fn task(&self, id: u32) -> Option<Arc<TaskNode>> {
        read(&self.tasks).get(&id).cloned()
    }

    pub fn tasks(&self) -> Vec<Arc<TaskNode>> {
        read(&self.tasks).values().cloned().collect()
    }
}

#[derive(Debug)]
pub struct TaskNode {
    pub id: u32,
    pub core: NodeCore,
    partitions: RwLock<BTreeSet<TopicPartition>>,
    poll: OnceLock<Arc<BatchPollContext>>,
    records: AtomicU64,
}

impl TaskNode {
    pub(crate) fn new(id: u32, restarts: &RestartsConfig, token: CancellationToken) -> Self {
        Self {
            id,
            core: NodeCore::new(restarts, token),
            partitions: RwLock::new(BTreeSet::new()),
            poll: OnceLock::new(),
            records: AtomicU64::new(0),
        }
    }

    pub(crate) fn assign(&self, partitions: &[TopicPartition]) {
        write(&self.partitions).extend(partitions.iter().cloned());
    }

    pub(crate) fn revoke(&self, partitions: &[TopicPartition]) {
        let mut assigned = write(&self.partitions);
        for partition in partitions {
            assigned.remove(partition);
        }
    }

    pub fn partitions(&self) -> Vec<TopicPartition> {
        read(&self.partitions).iter().cloned().collect()
    }

    /// First registration wins, later tokens are ignored.
    pub(crate) fn poll_context(&self, token: &CancellationToken) -> Arc<BatchPollContext> {
        Arc::clone(
            self.poll
                .get_or_init(|| Arc::new(BatchPollContext::new(token.clone()))),
        )
    }

    pub fn poll_index(&self) -> u64 {
        self.poll.get().map_or(0, |poll| poll.iteration())
    }

    pub(crate) fn add_records(&self, count: u64) {
        self.records.fetch_add(count, Ordering::Relaxed);
    }

    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }
}
