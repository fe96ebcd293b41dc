use crate::{
    context::PipelineContext, exception::ExceptionHandler, partition::PartitionHandler,
    retry::RetriableHandler,
};
use async_trait::async_trait;
use chrono::Utc;
use engine_config::settings::{BatchConfig, ConnectorKind, EofConfig, ErrorsConfig};
use engine_core::connectors::{
    broker::{BrokerConsumer, BrokerProducer, ConsumeResult},
    converter::MessageConverter,
    plugin::Plugin,
    processor::ProcessorPipeline,
};
use model::{
    command::CommandRecord,
    error::ConnectError,
    records::{
        batch::ConnectBatch, partition::TopicPartitionOffset, record::ConnectRecord,
        status::RecordStatus,
    },
};
use std::{collections::BTreeMap, sync::Arc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of running one source command.
#[derive(Debug, Clone)]
pub struct SourceOutcome {
    /// The command with its new state, ready to be persisted.
    pub command: CommandRecord,
    pub produced: usize,
    pub failed: usize,
}

/// Per-task pipeline over the broker and the connector's plugin.
///
/// Holds the batch of the current poll iteration. Every step works on that
/// batch; `clear` starts the next iteration.
#[async_trait]
pub trait RecordCollection: Send + Sync {
    fn setup(&mut self, kind: ConnectorKind, connector: &str, task: u32)
    -> Result<(), ConnectError>;

    async fn try_subscribe(&mut self) -> bool;

    async fn try_publisher(&mut self) -> bool;

    async fn consume(&mut self, cancel: &CancellationToken) -> Result<(), ConnectError>;

    /// Deserializes consumed records and runs them through the processors.
    async fn process(&mut self) -> Result<(), ConnectError>;

    async fn sink(&mut self, cancel: &CancellationToken) -> Result<(), ConnectError>;

    /// Reads the latest state of the commands on the connector's command topic.
    async fn get_commands(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Vec<CommandRecord>, ConnectError>;

    async fn source(
        &self,
        command: CommandRecord,
        cancel: &CancellationToken,
    ) -> Result<SourceOutcome, ConnectError>;

    /// Persists a command to the command topic of the connector it belongs to.
    async fn update_command(&self, command: &CommandRecord) -> Result<(), ConnectError>;

    /// Asks a leader plugin for the commands of its target connector.
    async fn discover_commands(&self) -> Result<Vec<CommandRecord>, ConnectError>;

    /// Keeps the offset of a command's record from being committed.
    fn hold_command(&mut self, command: &CommandRecord);

    async fn commit(&mut self) -> Result<(), ConnectError>;

    /// Dead-letters failed records when tolerated, and makes the batch safe to commit.
    async fn dead_letter(&mut self, err: &ConnectError) -> usize;

    async fn notify_end_of_partition(&mut self) -> usize;

    fn record(&mut self);

    fn batch(&self) -> &ConnectBatch;

    fn errors(&self) -> &ErrorsConfig;

    async fn cleanup(&mut self);

    fn clear(&mut self);
}

pub struct ConnectRecordCollection {
    ctx: PipelineContext,
    kind: ConnectorKind,
    connector: String,
    task: u32,
    topics: Vec<String>,
    target: Option<String>,
    batch_config: BatchConfig,
    errors: ErrorsConfig,
    eof: EofConfig,
    plugin: Option<Plugin>,
    pipeline: ProcessorPipeline,
    converter: Arc<dyn MessageConverter>,
    retriable: RetriableHandler,
    partitions: PartitionHandler,
    exceptions: ExceptionHandler,
    consumer: Option<Box<dyn BrokerConsumer>>,
    producer: Option<Arc<dyn BrokerProducer>>,
    batch: ConnectBatch,
    /// Offsets handed to the broker for the current batch.
    committed: Vec<TopicPartitionOffset>,
}

impl ConnectRecordCollection {
    pub fn new(ctx: PipelineContext) -> Self {
        let converter = ctx.plugins.converter();
        let retriable = RetriableHandler::default();
        let partitions = ctx.partition_handler();
        let exceptions = ctx.exception_handler();
        Self {
            ctx,
            kind: ConnectorKind::Sink,
            connector: String::new(),
            task: 0,
            topics: Vec::new(),
            target: None,
            batch_config: BatchConfig::default(),
            errors: ErrorsConfig::default(),
            eof: EofConfig::default(),
            plugin: None,
            pipeline: ProcessorPipeline::new(),
            converter,
            retriable,
            partitions,
            exceptions,
            consumer: None,
            producer: None,
            batch: ConnectBatch::default(),
            committed: Vec::new(),
        }
    }

    /// Connector whose commands this task reads: a leader reads its target's.
    fn command_owner(&self) -> &str {
        match self.kind {
            ConnectorKind::Leader => self.target.as_deref().unwrap_or(&self.connector),
            _ => &self.connector,
        }
    }

    fn producer(&self) -> Result<&Arc<dyn BrokerProducer>, ConnectError> {
        self.producer
            .as_ref()
            .ok_or_else(|| ConnectError::fatal(format!("{}: no publisher", self.connector)))
    }

    /// Runs one source record through the processors and publishes it.
    async fn publish(
        &self,
        producer: &Arc<dyn BrokerProducer>,
        record: &mut ConnectRecord,
    ) -> Result<(), ConnectError> {
        let Some(document) = record.document.take() else {
            return Err(ConnectError::data("source record without a document"));
        };
        let Some(document) = self.pipeline.apply(&self.connector, document)? else {
            record.set_status(RecordStatus::Skipped);
            return Ok(());
        };

        record.message = self.converter.serialize(&record.topic, &document)?;
        record.document = Some(document);
        let delivered = producer
            .produce(&record.topic, record.message.clone())
            .await?;
        record.published(delivered);
        Ok(())
    }
}

fn is_settled(status: RecordStatus) -> bool {
    matches!(
        status,
        RecordStatus::Sinked
            | RecordStatus::Skipped
            | RecordStatus::Published
            | RecordStatus::Sourced
            | RecordStatus::Updated
            | RecordStatus::Failed
    )
}

#[async_trait]
impl RecordCollection for ConnectRecordCollection {
    fn setup(
        &mut self,
        kind: ConnectorKind,
        connector: &str,
        task: u32,
    ) -> Result<(), ConnectError> {
        let config = self
            .ctx
            .config
            .connector(connector)
            .cloned()
            .ok_or_else(|| ConnectError::fatal(format!("unknown connector '{connector}'")))?;

        self.kind = kind;
        self.connector = connector.to_string();
        self.task = task;
        self.batch_config = self.ctx.config.batch(connector);
        self.errors = self.ctx.config.errors(connector);
        self.eof = self.ctx.config.eof(connector);
        self.retriable = self.ctx.retriable_handler(&self.ctx.config.retries(connector));
        self.pipeline = self.ctx.plugins.pipeline(&config.processors)?;
        self.target = config.target.clone();
        self.topics = match kind {
            ConnectorKind::Sink => config.topics.clone(),
            ConnectorKind::Source => config.command_topic.iter().cloned().collect(),
            ConnectorKind::Leader => config
                .target
                .as_deref()
                .and_then(|target| self.ctx.config.command_topic(target))
                .into_iter()
                .collect(),
            ConnectorKind::Worker => Vec::new(),
        };
        self.plugin = match kind {
            ConnectorKind::Sink => Some(Plugin::Sink(self.ctx.plugins.sink(&config.plugin)?)),
            ConnectorKind::Source => {
                Some(Plugin::Source(self.ctx.plugins.source(&config.plugin)?))
            }
            ConnectorKind::Leader => {
                Some(Plugin::Leader(self.ctx.plugins.leader(&config.plugin)?))
            }
            ConnectorKind::Worker => None,
        };
        self.batch = ConnectBatch::new(connector);

        debug!(connector, task, %kind, "Record collection ready");
        Ok(())
    }

    async fn try_subscribe(&mut self) -> bool {
        let mut consumer = match self.ctx.clients.consumer(&self.connector, self.task) {
            Ok(consumer) => consumer,
            Err(err) => {
                error!(connector = %self.connector, task = self.task, error = %err, "Cannot create consumer");
                return false;
            }
        };

        if let Err(err) = consumer.subscribe(&self.topics).await {
            error!(connector = %self.connector, task = self.task, topics = ?self.topics, error = %err, "Subscribe failed");
            return false;
        }

        info!(connector = %self.connector, task = self.task, topics = ?self.topics, "Subscribed");
        self.consumer = Some(consumer);
        true
    }

    async fn try_publisher(&mut self) -> bool {
        match self.ctx.clients.producer(&self.connector) {
            Ok(producer) => {
                self.producer = Some(producer);
                true
            }
            Err(err) => {
                error!(connector = %self.connector, task = self.task, error = %err, "Cannot create publisher");
                false
            }
        }
    }

    async fn consume(&mut self, cancel: &CancellationToken) -> Result<(), ConnectError> {
        let consumer = self
            .consumer
            .as_mut()
            .ok_or_else(|| ConnectError::fatal("consume before subscribe"))?;
        let deadline = Instant::now() + self.batch_config.timeout();

        while self.batch.len() < self.batch_config.size && !cancel.is_cancelled() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match consumer.consume(remaining, cancel).await? {
                None => break,
                Some(ConsumeResult::Message { position, message }) => {
                    self.batch.push(ConnectRecord::sink(position, message));
                }
                Some(ConsumeResult::EndOfPartition(position)) => {
                    debug!(connector = %self.connector, %position, "End of partition reached");
                    self.batch.mark_eof(position);
                }
                Some(ConsumeResult::Assigned(partitions)) => {
                    info!(connector = %self.connector, task = self.task, ?partitions, "Partitions assigned");
                    self.ctx
                        .exec
                        .assign_partitions(&self.connector, self.task, &partitions);
                }
                Some(ConsumeResult::Revoked(partitions)) => {
                    info!(connector = %self.connector, task = self.task, ?partitions, "Partitions revoked");
                    self.ctx
                        .exec
                        .revoke_partitions(&self.connector, self.task, &partitions);
                }
            }
        }

        Ok(())
    }

    async fn process(&mut self) -> Result<(), ConnectError> {
        for record in self
            .batch
            .iter_mut()
            .filter(|r| r.status() == RecordStatus::Consumed)
        {
            record.set_status(RecordStatus::Processing);
            let processed = self
                .converter
                .deserialize(&record.topic, &record.message)
                .and_then(|document| self.pipeline.apply(&self.connector, document));

            match processed {
                Ok(Some(document)) => {
                    record.document = Some(document);
                    record.set_status(RecordStatus::Processed);
                }
                Ok(None) => record.set_status(RecordStatus::Skipped),
                Err(err) => record.fail(err),
            }
        }
        Ok(())
    }

    async fn sink(&mut self, cancel: &CancellationToken) -> Result<(), ConnectError> {
        let Some(Plugin::Sink(handler)) = &self.plugin else {
            return Err(ConnectError::fatal(format!(
                "{} has no sink plugin",
                self.connector
            )));
        };
        let handler = Arc::clone(handler);
        let connector = self.connector.clone();
        let task = self.task;

        let work = move |mut batch: ConnectBatch| {
            let handler = Arc::clone(&handler);
            let connector = connector.clone();
            async move {
                for record in batch.iter_mut() {
                    record.set_status(RecordStatus::Sinking);
                }
                let mut out = handler.put(&connector, task, batch).await?;
                for record in out.iter_mut().filter(|r| !r.is_failed()) {
                    record.set_status(RecordStatus::Sinked);
                }
                Ok::<_, ConnectError>(out)
            }
        };

        self.retriable
            .retry(
                work,
                &mut self.batch,
                &self.connector,
                RecordStatus::Sinked,
                cancel,
            )
            .await?;

        match self.batch.failure_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn get_commands(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Vec<CommandRecord>, ConnectError> {
        self.consume(cancel).await?;

        let owner = self.command_owner().to_string();
        let mut latest: BTreeMap<String, CommandRecord> = BTreeMap::new();
        for record in self.batch.iter_mut() {
            match CommandRecord::from_message(&record.message, record.position()) {
                Ok(command) if command.connector == owner => {
                    record.set_status(RecordStatus::Processed);
                    latest.insert(command.name.clone(), command);
                }
                Ok(command) => {
                    debug!(connector = %self.connector, owner = %command.connector, "Command belongs to another connector");
                    record.set_status(RecordStatus::Skipped);
                }
                Err(err) => {
                    warn!(connector = %self.connector, position = %record.position(), error = %err, "Unreadable command skipped");
                    record.set_status(RecordStatus::Skipped);
                }
            }
        }

        Ok(latest.into_values().collect())
    }

    async fn source(
        &self,
        mut command: CommandRecord,
        cancel: &CancellationToken,
    ) -> Result<SourceOutcome, ConnectError> {
        let Some(Plugin::Source(handler)) = &self.plugin else {
            return Err(ConnectError::fatal(format!(
                "{} has no source plugin",
                self.connector
            )));
        };
        let producer = self.producer()?;
        if cancel.is_cancelled() {
            return Err(ConnectError::Cancelled);
        }

        command.status = RecordStatus::Sourcing;
        let poll = handler.get(&self.connector, self.task, &command).await?;

        let mut batch = ConnectBatch::from_records(self.connector.as_str(), poll.records);
        let mut produced = 0;
        for record in batch.iter_mut() {
            record.set_status(RecordStatus::Sourcing);
            match self.publish(producer, record).await {
                Ok(()) if record.status() == RecordStatus::Published => produced += 1,
                Ok(()) => {}
                Err(err) => record.fail(err),
            }
        }

        let failed = batch.failed().count();
        if let Some(err) = batch.failure_error() {
            if !self.errors.tolerates() {
                return Err(err);
            }
            self.exceptions
                .handle_dead_letter(&batch, &err, &self.connector, &self.errors)
                .await;
        }

        command.status = RecordStatus::Sourced;
        command.command = poll.command;
        command.updated_at = Some(Utc::now());
        debug!(connector = %self.connector, command = %command.name, produced, failed, "Command sourced");

        Ok(SourceOutcome {
            command,
            produced,
            failed,
        })
    }

    async fn update_command(&self, command: &CommandRecord) -> Result<(), ConnectError> {
        let topic = self
            .ctx
            .config
            .command_topic(&command.connector)
            .ok_or_else(|| {
                ConnectError::fatal(format!("{} has no command topic", command.connector))
            })?;
        let delivered = self
            .producer()?
            .produce(&topic, command.to_message()?)
            .await?;
        debug!(connector = %self.connector, command = %command.name, status = %command.status, %delivered, "Command updated");
        Ok(())
    }

    async fn discover_commands(&self) -> Result<Vec<CommandRecord>, ConnectError> {
        let Some(Plugin::Leader(handler)) = &self.plugin else {
            return Err(ConnectError::fatal(format!(
                "{} has no leader plugin",
                self.connector
            )));
        };
        let target = self
            .target
            .as_deref()
            .ok_or_else(|| ConnectError::fatal(format!("{} has no target", self.connector)))?;

        let mut commands = handler.commands(&self.connector, target).await?;
        for command in &mut commands {
            command.connector = target.to_string();
        }
        Ok(commands)
    }

    fn hold_command(&mut self, command: &CommandRecord) {
        let Some(position) = &command.position else {
            return;
        };
        for record in self
            .batch
            .iter_mut()
            .filter(|r| &r.position() == position)
        {
            record.set_can_commit_offset(false);
        }
    }

    async fn commit(&mut self) -> Result<(), ConnectError> {
        let Some(consumer) = self.consumer.as_mut() else {
            return Ok(());
        };
        let committed = self
            .partitions
            .commit_offsets(&self.batch, consumer.as_mut())
            .await?;
        self.committed = committed;
        Ok(())
    }

    async fn dead_letter(&mut self, err: &ConnectError) -> usize {
        if !self.errors.tolerates() {
            return 0;
        }

        // Anything still in flight was never written and must be redelivered.
        for record in self.batch.iter_mut() {
            if !is_settled(record.status()) {
                record.set_can_commit_offset(false);
            }
        }

        let sent = self
            .exceptions
            .handle_dead_letter(&self.batch, err, &self.connector, &self.errors)
            .await;
        self.batch.tolerate_failures();
        sent
    }

    async fn notify_end_of_partition(&mut self) -> usize {
        self.partitions
            .notify_end_of_partition(
                &self.batch,
                &self.committed,
                &self.connector,
                self.task,
                &self.eof,
            )
            .await
    }

    fn record(&mut self) {
        if self.batch.is_empty() {
            return;
        }

        let records = self.batch.len() as u64;
        let failed = self.batch.failed().count() as u64;
        let bytes: usize = self.batch.iter().map(|r| r.message.size_bytes()).sum();

        self.ctx.metrics.increment_batches(1);
        self.ctx.metrics.increment_records(records);
        self.ctx.metrics.increment_bytes(bytes as u64);
        self.ctx.metrics.increment_failures(failed);
        self.ctx
            .exec
            .increment_records(&self.connector, self.task, records);

        debug!(connector = %self.connector, task = self.task, records, failed, bytes, "Batch recorded");
    }

    fn batch(&self) -> &ConnectBatch {
        &self.batch
    }

    fn errors(&self) -> &ErrorsConfig {
        &self.errors
    }

    async fn cleanup(&mut self) {
        if let Some(mut consumer) = self.consumer.take() {
            consumer.close().await;
        }
        self.producer = None;
        debug!(connector = %self.connector, task = self.task, "Record collection closed");
    }

    fn clear(&mut self) {
        self.batch = ConnectBatch::new(self.connector.as_str());
        self.committed.clear();
    }
}
