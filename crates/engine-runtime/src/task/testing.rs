use async_trait::async_trait;
use engine_config::{
    provider::StaticConfigProvider,
    settings::{ConnectorKind, ErrorsConfig, WorkerConfig},
};
use engine_core::connectors::{
    broker::{BrokerAdmin, BrokerClientFactory, BrokerConsumer, BrokerProducer},
    plugin::PluginRegistry,
};
use engine_processing::{
    collection::{RecordCollection, SourceOutcome},
    context::PipelineContext,
};
use model::{
    command::CommandRecord,
    error::ConnectError,
    records::{
        batch::ConnectBatch, message::Message, partition::TopicPartitionOffset,
        record::ConnectRecord, status::RecordStatus,
    },
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio_util::sync::CancellationToken;

pub type Calls = Arc<Mutex<Vec<&'static str>>>;

/// Factory for tasks that never reach a broker.
pub struct NoBroker;

impl BrokerClientFactory for NoBroker {
    fn consumer(&self, _: &str, _: u32) -> Result<Box<dyn BrokerConsumer>, ConnectError> {
        Err(ConnectError::retriable("no broker"))
    }

    fn producer(&self, _: &str) -> Result<Arc<dyn BrokerProducer>, ConnectError> {
        Err(ConnectError::retriable("no broker"))
    }

    fn admin(&self) -> Result<Arc<dyn BrokerAdmin>, ConnectError> {
        Err(ConnectError::retriable("no broker"))
    }
}

pub fn context_with(
    config: WorkerConfig,
    clients: Arc<dyn BrokerClientFactory>,
) -> PipelineContext {
    PipelineContext::new(
        Arc::new(StaticConfigProvider::new(config).unwrap()),
        clients,
        PluginRegistry::new(),
    )
}

pub fn context() -> PipelineContext {
    context_with(WorkerConfig::new("w1"), Arc::new(NoBroker))
}

/// Record collection that logs every call and replays configured outcomes.
pub struct ScriptedRecords {
    calls: Calls,
    errors: ErrorsConfig,
    subscribe: bool,
    sink_error: Option<ConnectError>,
    stop: Option<(usize, CancellationToken)>,
    polls: usize,
    batch: ConnectBatch,
    commands: Vec<CommandRecord>,
    produced: HashMap<String, Result<usize, ConnectError>>,
    discovered: Vec<CommandRecord>,
    pub updated: Arc<Mutex<Vec<CommandRecord>>>,
    pub held: Arc<Mutex<Vec<String>>>,
}

impl ScriptedRecords {
    pub fn new(errors: ErrorsConfig) -> Self {
        Self {
            calls: Calls::default(),
            errors,
            subscribe: true,
            sink_error: None,
            stop: None,
            polls: 0,
            batch: ConnectBatch::default(),
            commands: Vec::new(),
            produced: HashMap::new(),
            discovered: Vec::new(),
            updated: Arc::default(),
            held: Arc::default(),
        }
    }

    pub fn calls(&self) -> Calls {
        Arc::clone(&self.calls)
    }

    pub fn refuse_subscribe(mut self) -> Self {
        self.subscribe = false;
        self
    }

    pub fn failing_sink(mut self, err: ConnectError) -> Self {
        self.sink_error = Some(err);
        self
    }

    /// Cancels `token` once `polls` iterations were cleared.
    pub fn stop_after(mut self, polls: usize, token: CancellationToken) -> Self {
        self.stop = Some((polls, token));
        self
    }

    pub fn with_commands(mut self, commands: Vec<CommandRecord>) -> Self {
        self.commands = commands;
        self
    }

    pub fn producing(mut self, command: &str, produced: Result<usize, ConnectError>) -> Self {
        self.produced.insert(command.to_string(), produced);
        self
    }

    pub fn discovering(mut self, commands: Vec<CommandRecord>) -> Self {
        self.discovered = commands;
        self
    }

    fn log(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RecordCollection for ScriptedRecords {
    fn setup(&mut self, _: ConnectorKind, _: &str, _: u32) -> Result<(), ConnectError> {
        self.log("setup");
        Ok(())
    }

    async fn try_subscribe(&mut self) -> bool {
        self.log("try_subscribe");
        self.subscribe
    }

    async fn try_publisher(&mut self) -> bool {
        self.log("try_publisher");
        true
    }

    async fn consume(&mut self, _: &CancellationToken) -> Result<(), ConnectError> {
        self.log("consume");
        self.batch.push(ConnectRecord::sink(
            TopicPartitionOffset::new("orders", 0, self.polls as i64),
            Message::new(None, Some(b"{}".to_vec())),
        ));
        Ok(())
    }

    async fn process(&mut self) -> Result<(), ConnectError> {
        self.log("process");
        Ok(())
    }

    async fn sink(&mut self, _: &CancellationToken) -> Result<(), ConnectError> {
        self.log("sink");
        match &self.sink_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn get_commands(
        &mut self,
        _: &CancellationToken,
    ) -> Result<Vec<CommandRecord>, ConnectError> {
        self.log("get_commands");
        Ok(self.commands.clone())
    }

    async fn source(
        &self,
        mut command: CommandRecord,
        _: &CancellationToken,
    ) -> Result<SourceOutcome, ConnectError> {
        self.log("source");
        let produced = self
            .produced
            .get(&command.name)
            .cloned()
            .unwrap_or(Ok(0))?;
        command.status = RecordStatus::Sourced;
        Ok(SourceOutcome {
            command,
            produced,
            failed: 0,
        })
    }

    async fn update_command(&self, command: &CommandRecord) -> Result<(), ConnectError> {
        self.log("update_command");
        self.updated.lock().unwrap().push(command.clone());
        Ok(())
    }

    async fn discover_commands(&self) -> Result<Vec<CommandRecord>, ConnectError> {
        self.log("discover_commands");
        Ok(self.discovered.clone())
    }

    fn hold_command(&mut self, command: &CommandRecord) {
        self.log("hold_command");
        self.held.lock().unwrap().push(command.name.clone());
    }

    async fn commit(&mut self) -> Result<(), ConnectError> {
        self.log("commit");
        Ok(())
    }

    async fn dead_letter(&mut self, _: &ConnectError) -> usize {
        self.log("dead_letter");
        0
    }

    async fn notify_end_of_partition(&mut self) -> usize {
        self.log("notify_end_of_partition");
        0
    }

    fn record(&mut self) {
        self.log("record");
    }

    fn batch(&self) -> &ConnectBatch {
        &self.batch
    }

    fn errors(&self) -> &ErrorsConfig {
        &self.errors
    }

    async fn cleanup(&mut self) {
        self.log("cleanup");
    }

    fn clear(&mut self) {
        self.log("clear");
        self.batch = ConnectBatch::default();
        self.polls += 1;
        if let Some((polls, token)) = &self.stop
            && self.polls >= *polls
        {
            token.cancel();
        }
    }
}
