#![allow(dead_code)]

use crate::broker::MemoryBroker;
use async_trait::async_trait;
use engine_config::{
    provider::StaticConfigProvider,
    settings::{BatchConfig, ConnectorConfig, ConnectorKind, RestartsConfig, WorkerConfig},
};
use engine_core::connectors::plugin::{
    LeaderHandler, PluginRegistry, SinkHandler, SourceHandler, SourcePoll,
};
use engine_runtime::Worker;
use model::{
    command::CommandRecord,
    error::ConnectError,
    records::{
        batch::ConnectBatch,
        message::{Document, Message},
        record::ConnectRecord,
    },
};
use serde_json::{Value, json};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub const SINK: &str = "orders-sink";
pub const SOURCE: &str = "users-source";
pub const LEADER: &str = "users-leader";

/// Sink plugin that keeps every document value it was handed.
#[derive(Default)]
pub struct CollectingSink {
    received: Mutex<Vec<Value>>,
}

impl CollectingSink {
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

#[async_trait]
impl SinkHandler for CollectingSink {
    async fn put(
        &self,
        _: &str,
        _: u32,
        batch: ConnectBatch,
    ) -> Result<ConnectBatch, ConnectError> {
        let mut received = self.received.lock().unwrap();
        received.extend(batch.iter().filter_map(|r| r.document.as_ref().map(|d| d.value.clone())));
        Ok(batch)
    }
}

/// Source plugin serving a fixed table. The command's `cursor` is the next row.
pub struct TableSource {
    pub topic: String,
    pub rows: Vec<Value>,
}

#[async_trait]
impl SourceHandler for TableSource {
    async fn get(
        &self,
        _: &str,
        _: u32,
        command: &CommandRecord,
    ) -> Result<SourcePoll, ConnectError> {
        let cursor = command.command["cursor"].as_u64().unwrap_or(0) as usize;
        let end = (cursor + command.batch_size.max(1)).min(self.rows.len());
        let records = self.rows[cursor.min(end)..end]
            .iter()
            .map(|row| {
                ConnectRecord::source(
                    self.topic.as_str(),
                    Document::new(Value::Null, row.clone()),
                )
            })
            .collect();

        Ok(SourcePoll {
            records,
            command: json!({ "cursor": end }),
        })
    }
}

/// Leader plugin announcing one command per table.
pub struct TableLeader {
    pub tables: Vec<String>,
    pub batch_size: usize,
}

#[async_trait]
impl LeaderHandler for TableLeader {
    async fn commands(&self, _: &str, target: &str) -> Result<Vec<CommandRecord>, ConnectError> {
        Ok(self
            .tables
            .iter()
            .map(|table| CommandRecord::new(table.as_str(), target, self.batch_size, json!({ "cursor": 0 })))
            .collect())
    }
}

pub fn json_message(value: Value) -> Message {
    Message::new(None, Some(value.to_string().into_bytes()))
}

pub fn raw_message(value: &str) -> Message {
    Message::new(None, Some(value.as_bytes().to_vec()))
}

pub fn decode(message: &Message) -> Value {
    serde_json::from_slice(message.value.as_deref().unwrap_or(b"null")).unwrap()
}

/// Worker defaults tuned for fast tests: short polls and quick restarts.
pub fn worker_config() -> WorkerConfig {
    let mut config = WorkerConfig::new("it-worker");
    config.batch = BatchConfig {
        size: 10,
        parallelism: 1,
        timeout_ms: 20,
    };
    config.restarts = RestartsConfig {
        attempts: 1,
        retry_wait_ms: 10,
        periodic_delay_ms: 60_000,
    };
    config
}

pub fn sink_connector(topics: &[&str]) -> ConnectorConfig {
    let mut connector = ConnectorConfig::new(SINK, ConnectorKind::Sink, "collect");
    connector.topics = topics.iter().map(|t| t.to_string()).collect();
    connector
}

/// A worker running in the background until [`RunningWorker::stop`].
pub struct RunningWorker {
    pub worker: Arc<Worker>,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl RunningWorker {
    pub fn start(config: WorkerConfig, broker: &MemoryBroker, plugins: PluginRegistry) -> Self {
        let provider = StaticConfigProvider::new(config).expect("valid worker config");
        let worker = Arc::new(Worker::new(Arc::new(provider), broker.clients(), plugins));
        let shutdown = CancellationToken::new();

        let handle = {
            let worker = Arc::clone(&worker);
            let shutdown = shutdown.clone();
            tokio::spawn(
                async move {
                    worker.run(shutdown).await.expect("worker run");
                }
                .in_current_span(),
            )
        };

        Self {
            worker,
            shutdown,
            handle,
        }
    }

    pub async fn stop(self) -> Arc<Worker> {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("worker stops on shutdown")
            .expect("worker task");
        self.worker
    }
}

/// Polls `check` until it holds, failing the test after a few seconds.
pub async fn eventually<F>(what: &str, check: F)
where
    F: Fn() -> bool,
{
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
