use crate::context::{
    node::{ConnectorNode, NodeCore, NodeStatus, TaskNode, WorkerNode, read, write},
    pause::ResumeSignal,
    poll::BatchPollContext,
    snapshot::{WorkerDetails, WorkerStatus},
};
use engine_config::settings::RestartsConfig;
use model::records::partition::TopicPartition;
use std::{
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Which node of the tree a command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    Worker,
    Connector(&'a str),
    Task(&'a str, u32),
}

impl<'a> Scope<'a> {
    /// No connector means the worker; a connector without a task id means the connector.
    pub fn of(connector: Option<&'a str>, task: Option<u32>) -> Self {
        match (connector, task) {
            (None, _) => Scope::Worker,
            (Some(connector), None) => Scope::Connector(connector),
            (Some(connector), Some(task)) => Scope::Task(connector, task),
        }
    }
}

/// Shared worker → connector → task registry.
///
/// Structural changes take a lock on the level they touch; counters are
/// atomics. Commands addressing a node that was never initialized are no-ops.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    worker: RwLock<Arc<WorkerNode>>,
    poll_index: AtomicU64,
    resumed: ResumeSignal,
}

impl ExecutionContext {
    pub fn new(worker: &str, restarts: &RestartsConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                worker: RwLock::new(Arc::new(WorkerNode::new(
                    worker,
                    restarts,
                    CancellationToken::new(),
                ))),
                poll_index: AtomicU64::new(0),
                resumed: ResumeSignal::default(),
            }),
        }
    }

    pub fn worker(&self) -> Arc<WorkerNode> {
        Arc::clone(&read(&self.inner.worker))
    }

    pub fn connector(&self, name: &str) -> Option<Arc<ConnectorNode>> {
        self.worker().connector(name)
    }

    pub fn task(&self, connector: &str, id: u32) -> Option<Arc<TaskNode>> {
        self.connector(connector).and_then(|c| c.task(id))
    }

    /// Registers or refreshes the worker node, dropping its connectors.
    /// Returns the token for the new worker cycle.
    pub fn initialize_worker(
        &self,
        name: &str,
        restarts: &RestartsConfig,
        parent: &CancellationToken,
    ) -> CancellationToken {
        let token = parent.child_token();
        let mut worker = write(&self.inner.worker);
        if worker.name == name {
            worker.refresh(token.clone());
        } else {
            *worker = Arc::new(WorkerNode::new(name, restarts, token.clone()));
        }
        debug!(worker = name, "Worker initialized");
        token
    }

    /// Registers or refreshes a connector node, dropping its tasks.
    pub fn initialize_connector(
        &self,
        name: &str,
        restarts: &RestartsConfig,
        parent: &CancellationToken,
    ) -> CancellationToken {
        let token = parent.child_token();
        let worker = self.worker();
        let mut connectors = write(&worker.connectors);
        match connectors.get(name) {
            Some(node) => node.refresh(token.clone()),
            None => {
                connectors.insert(
                    name.to_string(),
                    Arc::new(ConnectorNode::new(name, restarts, token.clone())),
                );
            }
        }
        debug!(connector = name, "Connector initialized");
        token
    }

    /// Registers a fresh task node under an existing connector. Task pause
    /// state carries over from the previous node in the same slot.
    pub fn initialize_task(
        &self,
        connector: &str,
        id: u32,
        restarts: &RestartsConfig,
        parent: &CancellationToken,
    ) -> CancellationToken {
        let token = parent.child_token();
        let Some(node) = self.connector(connector) else {
            debug!(connector, task = id, "Connector not registered, task left untracked");
            return token;
        };

        let task = TaskNode::new(id, restarts, token.clone());
        let mut tasks = write(&node.tasks);
        if tasks.get(&id).is_some_and(|prev| prev.core.is_paused()) {
            task.core.gate.pause();
        }
        tasks.insert(id, Arc::new(task));
        debug!(connector, task = id, "Task initialized");
        token
    }

    pub fn assign_partitions(&self, connector: &str, task: u32, partitions: &[TopicPartition]) {
        if let Some(node) = self.task(connector, task) {
            node.assign(partitions);
        }
    }

    pub fn revoke_partitions(&self, connector: &str, task: u32, partitions: &[TopicPartition]) {
        if let Some(node) = self.task(connector, task) {
            node.revoke(partitions);
        }
    }

    /// Returns the task's poll context, binding it to `token` on first use.
    /// An unregistered task gets a detached context.
    pub fn get_or_set_batch_context(
        &self,
        connector: &str,
        task: u32,
        token: &CancellationToken,
    ) -> Arc<BatchPollContext> {
        match self.task(connector, task) {
            Some(node) => node.poll_context(token),
            None => Arc::new(BatchPollContext::new(token.clone())),
        }
    }

    /// Next value of the process-wide poll counter.
    pub fn next_poll_index(&self) -> u64 {
        self.inner.poll_index.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn increment_records(&self, connector: &str, task: u32, count: u64) {
        if let Some(node) = self.task(connector, task) {
            node.add_records(count);
        }
    }

    fn with_core<R>(&self, scope: Scope<'_>, f: impl FnOnce(&NodeCore) -> R) -> Option<R> {
        let worker = self.worker();
        match scope {
            Scope::Worker => Some(f(&worker.core)),
            Scope::Connector(connector) => worker.connector(connector).map(|c| f(&c.core)),
            Scope::Task(connector, task) => worker
                .connector(connector)
                .and_then(|c| c.task(task))
                .map(|t| f(&t.core)),
        }
    }

    pub fn status(&self, connector: Option<&str>, task: Option<u32>) -> Option<NodeStatus> {
        self.with_core(Scope::of(connector, task), NodeCore::status)
    }

    pub fn set_status(&self, connector: Option<&str>, task: Option<u32>, status: NodeStatus) {
        self.with_core(Scope::of(connector, task), |core| core.set_status(status));
    }

    pub fn pause(&self, connector: Option<&str>, task: Option<u32>) {
        let scope = Scope::of(connector, task);
        if self.with_core(scope, |core| core.gate.pause()) == Some(true) {
            info!(?scope, "Paused");
        }
    }

    pub fn resume(&self, connector: Option<&str>, task: Option<u32>) {
        let scope = Scope::of(connector, task);
        if self.with_core(scope, |core| core.gate.resume()) == Some(true) {
            info!(?scope, "Resumed");
            self.inner.resumed.notify();
        }
    }

    /// Cancels the addressed node's current cycle and flags it for restart.
    pub fn restart(&self, connector: Option<&str>, task: Option<u32>) {
        let scope = Scope::of(connector, task);
        if self.with_core(scope, NodeCore::request_restart).is_some() {
            info!(?scope, "Restart requested");
        }
    }

    /// Clears and returns the restart flag of the addressed node.
    pub fn take_restart_request(&self, connector: Option<&str>, task: Option<u32>) -> bool {
        self.with_core(Scope::of(connector, task), NodeCore::take_restart_request)
            .unwrap_or(false)
    }

    /// Consumes one restart attempt of the addressed node.
    pub fn retry(&self, connector: Option<&str>, task: Option<u32>) -> bool {
        self.with_core(Scope::of(connector, task), |core| core.restart.retry())
            .unwrap_or(false)
    }

    pub fn retry_wait(&self, connector: Option<&str>, task: Option<u32>) -> Duration {
        self.with_core(Scope::of(connector, task), |core| core.restart.retry_wait())
            .unwrap_or_default()
    }

    /// True when the node or any of its ancestors is paused.
    pub fn is_paused(&self, connector: Option<&str>, task: Option<u32>) -> bool {
        let worker = self.worker();
        if worker.core.is_paused() {
            return true;
        }
        let Some(node) = connector.and_then(|c| worker.connector(c)) else {
            return false;
        };
        if node.core.is_paused() {
            return true;
        }
        task.and_then(|t| node.task(t))
            .is_some_and(|t| t.core.is_paused())
    }

    /// Blocks until the addressed node and its ancestors are resumed or `cancel` fires.
    pub async fn wait_while_paused(
        &self,
        connector: Option<&str>,
        task: Option<u32>,
        cancel: &CancellationToken,
    ) {
        self.inner
            .resumed
            .wait_while(|| self.is_paused(connector, task), cancel)
            .await;
    }

    pub fn get_status(&self) -> WorkerStatus {
        WorkerStatus::capture(&self.worker())
    }

    pub fn get_full_details(&self) -> WorkerDetails {
        WorkerDetails::capture(&self.worker())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn restarts(attempts: u32) -> RestartsConfig {
        RestartsConfig {
            attempts,
            retry_wait_ms: 5,
            periodic_delay_ms: 60_000,
        }
    }

    fn tp(topic: &str, partition: i32) -> TopicPartition {
        TopicPartition::new(topic, partition)
    }

    fn context() -> (ExecutionContext, CancellationToken) {
        let ctx = ExecutionContext::new("worker-1", &restarts(2));
        let shutdown = CancellationToken::new();
        let worker = ctx.initialize_worker("worker-1", &restarts(2), &shutdown);
        let connector = ctx.initialize_connector("orders", &restarts(2), &worker);
        ctx.initialize_task("orders", 0, &restarts(2), &connector);
        (ctx, shutdown)
    }

    #[test]
    fn scope_routing() {
        assert_eq!(Scope::of(None, Some(3)), Scope::Worker);
        assert_eq!(Scope::of(Some("a"), None), Scope::Connector("a"));
        assert_eq!(Scope::of(Some("a"), Some(1)), Scope::Task("a", 1));
    }

    #[test]
    fn partitions_are_ignored_for_unknown_tasks() {
        let (ctx, _shutdown) = context();
        ctx.assign_partitions("orders", 7, &[tp("orders", 0)]);
        ctx.assign_partitions("missing", 0, &[tp("orders", 0)]);

        ctx.assign_partitions("orders", 0, &[tp("orders", 0), tp("orders", 1)]);
        ctx.revoke_partitions("orders", 0, &[tp("orders", 0)]);

        let task = ctx.task("orders", 0).unwrap();
        assert_eq!(task.partitions(), vec![tp("orders", 1)]);
        assert!(ctx.task("orders", 7).is_none());
    }

    #[test]
    fn initializing_a_connector_clears_its_tasks() {
        let (ctx, shutdown) = context();
        ctx.initialize_task("orders", 1, &restarts(2), &shutdown);
        assert_eq!(ctx.connector("orders").unwrap().tasks().len(), 2);

        ctx.initialize_connector("orders", &restarts(2), &shutdown);
        assert!(ctx.connector("orders").unwrap().tasks().is_empty());
    }

    #[test]
    fn first_poll_context_registration_wins() {
        let (ctx, _shutdown) = context();
        let first = CancellationToken::new();
        let second = CancellationToken::new();

        let poll = ctx.get_or_set_batch_context("orders", 0, &first);
        let again = ctx.get_or_set_batch_context("orders", 0, &second);
        assert!(Arc::ptr_eq(&poll, &again));

        first.cancel();
        assert!(again.is_cancelled());

        poll.reset(ctx.next_poll_index());
        assert_eq!(ctx.task("orders", 0).unwrap().poll_index(), 1);
    }

    #[test]
    fn pause_and_resume_route_by_scope() {
        let (ctx, _shutdown) = context();

        ctx.pause(Some("orders"), None);
        assert!(ctx.is_paused(Some("orders"), Some(0)));
        assert!(!ctx.is_paused(None, None));

        ctx.resume(Some("orders"), None);
        ctx.pause(Some("orders"), Some(0));
        assert!(ctx.is_paused(Some("orders"), Some(0)));
        assert!(!ctx.is_paused(Some("orders"), None));

        ctx.pause(None, None);
        assert!(ctx.is_paused(Some("orders"), None));

        // Unknown nodes are ignored.
        ctx.pause(Some("missing"), Some(4));
        ctx.resume(Some("missing"), None);
    }

    #[test]
    fn restart_cancels_the_cycle_and_flags_the_node() {
        let (ctx, _shutdown) = context();
        let task_token = ctx.task("orders", 0).unwrap().core.token();

        ctx.restart(Some("orders"), None);

        assert!(task_token.is_cancelled());
        assert!(ctx.take_restart_request(Some("orders"), None));
        assert!(!ctx.take_restart_request(Some("orders"), None));
        assert!(!ctx.take_restart_request(Some("orders"), Some(0)));
    }

    #[test]
    fn retry_budget_is_independent_per_level() {
        let (ctx, _shutdown) = context();

        assert!(ctx.retry(Some("orders"), None));
        assert!(ctx.retry(Some("orders"), None));
        assert!(!ctx.retry(Some("orders"), None));

        assert!(ctx.retry(None, None));
        assert!(ctx.retry(Some("orders"), Some(0)));
        assert!(!ctx.retry(Some("missing"), None));
    }

    #[test]
    fn snapshots_report_counts_and_counters() {
        let (ctx, _shutdown) = context();
        ctx.set_status(Some("orders"), None, NodeStatus::Running);
        ctx.set_status(Some("orders"), Some(0), NodeStatus::Running);
        ctx.assign_partitions("orders", 0, &[tp("orders", 2)]);
        ctx.increment_records("orders", 0, 4);
        ctx.pause(Some("orders"), Some(0));

        let status = ctx.get_status();
        assert_eq!(status.name, "worker-1");
        assert_eq!(status.connectors.running, 1);
        assert_eq!(status.tasks.paused, 1);

        let details = ctx.get_full_details();
        let task = &details.connectors[0].task_details[0];
        assert_eq!(task.records, 4);
        assert_eq!(task.partitions, vec![tp("orders", 2)]);
        assert_eq!(task.status, NodeStatus::Paused);
    }

    #[tokio::test]
    async fn wait_while_paused_returns_once_resumed() {
        let (ctx, _shutdown) = context();
        ctx.pause(Some("orders"), None);

        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                ctx.wait_while_paused(Some("orders"), Some(0), &CancellationToken::new())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        ctx.resume(Some("orders"), None);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("resume should release the waiter")
            .unwrap();
    }
}
