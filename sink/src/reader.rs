use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use chrono::Utc;
use sink_config::shared::{SchemaChangePolicy, TargetConfig};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::batch::{AppendOutcome, BatchBuffer, FlushReason};
use crate::checkpoint::{CheckpointManager, StateEmitter};
use crate::conversions::RecordConverter;
use crate::destination::Destination;
use crate::error::{ErrorKind, SinkError, SinkResult};
use crate::load::LoadEngine;
use crate::messages::{
    parse_message, ActivateVersionMessage, Message, RecordMessage, SchemaMessage, StateMessage,
};
use crate::schema::{SchemaRegistry, StreamSchema, TableNaming, TableReconciler, TypeMapper};
use crate::types::StreamId;
use crate::workers::load::LoadTask;
use crate::workers::pool::LoadWorkerPool;
use crate::{bail, sink_error};

/// States of the [`MessageReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    AwaitingMessage,
    ProcessingSchema,
    ProcessingRecord,
    ProcessingState,
    /// The input ended; buffers are flushed and loads awaited.
    Draining,
    Finished,
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            ReaderState::AwaitingMessage => "awaiting_message",
            ReaderState::ProcessingSchema => "processing_schema",
            ReaderState::ProcessingRecord => "processing_record",
            ReaderState::ProcessingState => "processing_state",
            ReaderState::Draining => "draining",
            ReaderState::Finished => "finished",
        };

        f.write_str(state)
    }
}

/// Counters describing a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub messages: u64,
    pub schemas: u64,
    pub records: u64,
    pub states: u64,
    pub batches_flushed: u64,
    pub checkpoints_emitted: u64,
    /// Streams that failed, sorted by name.
    pub failed_streams: Vec<StreamId>,
    /// Whether the run stopped on a shutdown request instead of the end of the input.
    pub interrupted: bool,
}

/// Drives the sink from the parsed message stream.
///
/// The reader owns every per-stream structure: the schema registry, the table reconciler,
/// the batch buffer and the sequence counters. Loads run on the worker pool; their commits
/// release checkpoints through the [`CheckpointManager`].
#[derive(Debug)]
pub struct MessageReader<D, E> {
    state: ReaderState,
    registry: SchemaRegistry,
    reconciler: TableReconciler,
    converter: RecordConverter,
    buffer: BatchBuffer,
    engine: LoadEngine<D>,
    checkpoints: CheckpointManager<E>,
    pool: LoadWorkerPool,
    sequences: HashMap<StreamId, u64>,
    failed: BTreeMap<StreamId, SinkError>,
    metadata_columns: bool,
    primary_key_required: bool,
    schema_change_policy: SchemaChangePolicy,
    summary: RunSummary,
}

impl<D, E> MessageReader<D, E>
where
    D: Destination + Clone + Send + Sync + 'static,
    E: StateEmitter + Clone + Send + Sync + 'static,
{
    pub fn new(config: &TargetConfig, destination: D, emitter: E) -> Self {
        let metadata_columns = config.metadata_columns_enabled();
        let max_fill = config.max_batch_fill_ms.map(Duration::from_millis);

        Self {
            state: ReaderState::AwaitingMessage,
            registry: SchemaRegistry::new(),
            reconciler: TableReconciler::new(
                TypeMapper::new(config.nested_values),
                TableNaming::new(config),
            ),
            converter: RecordConverter::new(metadata_columns),
            buffer: BatchBuffer::new(config.batch_size, max_fill),
            engine: LoadEngine::new(destination, config.load_retry.clone(), config.hard_delete),
            checkpoints: CheckpointManager::new(emitter),
            pool: LoadWorkerPool::new(usize::from(config.max_parallel_loads)),
            sequences: HashMap::new(),
            failed: BTreeMap::new(),
            metadata_columns,
            primary_key_required: config.primary_key_required,
            schema_change_policy: config.schema_change_policy,
            summary: RunSummary::default(),
        }
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Returns whether `stream` failed and its messages are skipped.
    pub fn is_failed(&self, stream: &StreamId) -> bool {
        self.failed.contains_key(stream)
    }

    /// Returns the number of records buffered for `stream`.
    pub fn buffered(&self, stream: &StreamId) -> usize {
        self.buffer.len(stream)
    }

    /// Processes one input line.
    ///
    /// Errors concerning a single stream fail that stream and are not returned; every
    /// returned error ends the run.
    pub async fn process_line(&mut self, line: &str) -> SinkResult<()> {
        if matches!(self.state, ReaderState::Draining | ReaderState::Finished) {
            bail!(
                ErrorKind::InvalidState,
                "Reader does not accept messages anymore",
                self.state
            );
        }

        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let message = parse_message(line)?;
        self.summary.messages += 1;

        let stream = message.stream().map(StreamId::from);
        if let Some(stream) = &stream {
            if self.is_failed(stream) {
                debug!(%stream, "skipping message of failed stream");
                return Ok(());
            }
        }

        let result = match message {
            Message::Schema(message) => {
                self.state = ReaderState::ProcessingSchema;
                self.handle_schema(message).await
            }
            Message::Record(message) => {
                self.state = ReaderState::ProcessingRecord;
                self.handle_record(message).await
            }
            Message::State(message) => {
                self.state = ReaderState::ProcessingState;
                self.handle_state(message).await
            }
            Message::ActivateVersion(message) => {
                self.handle_activate_version(message);
                Ok(())
            }
        };
        self.state = ReaderState::AwaitingMessage;

        match (result, stream) {
            (Err(err), Some(stream)) if err.is_stream_fatal() => self.fail_stream(stream, err),
            (Err(err), _) => return Err(err),
            (Ok(()), _) => {}
        }

        self.reap_loads().await
    }

    /// Flushes every buffer older than the configured fill limit.
    pub async fn flush_expired(&mut self, now: Instant) -> SinkResult<()> {
        for stream in self.buffer.expired(now) {
            self.flush_stream(&stream, FlushReason::Expired).await?;
        }

        self.reap_loads().await
    }

    /// Flushes every buffer, waits for all loads and reports failed streams.
    pub async fn finish(&mut self) -> SinkResult<RunSummary> {
        self.state = ReaderState::Draining;
        info!(
            streams = self.buffer.streams().len(),
            in_flight = self.pool.in_flight(),
            "input ended, draining buffers"
        );

        let mut flush_error = None;
        for stream in self.buffer.streams() {
            if let Err(err) = self.flush_stream(&stream, FlushReason::EndOfInput).await {
                flush_error = Some(err);
                break;
            }
        }

        let waited = self.pool.wait_all().await;
        self.state = ReaderState::Finished;
        self.refresh_summary().await;

        let pending = self.checkpoints.pending().await;
        if pending > 0 {
            warn!(pending, "checkpoints not emitted, data they cover was not loaded");
        }

        if let Some(err) = flush_error {
            return Err(err);
        }
        waited?;

        if !self.failed.is_empty() {
            let errors: Vec<SinkError> = self.failed.values().cloned().collect();
            error!(failed_streams = errors.len(), "run finished with failed streams");

            return Err(SinkError::many(errors));
        }

        info!(
            records = self.summary.records,
            batches = self.summary.batches_flushed,
            checkpoints = self.summary.checkpoints_emitted,
            "run finished"
        );

        Ok(self.summary.clone())
    }

    /// Waits for in-flight loads without flushing buffers.
    pub async fn wait_loads(&mut self) -> SinkResult<()> {
        let result = self.pool.wait_all().await;
        self.refresh_summary().await;

        result
    }

    /// Aborts every in-flight load.
    pub fn abort_loads(&mut self) {
        self.pool.abort_all();
    }

    /// Marks the run as stopped by a shutdown request.
    pub fn interrupt(&mut self) {
        self.summary.interrupted = true;
        self.state = ReaderState::Finished;
    }

    async fn handle_schema(&mut self, message: SchemaMessage) -> SinkResult<()> {
        self.summary.schemas += 1;

        let schema = StreamSchema::from_message(&message, self.metadata_columns)?;
        let stream = schema.stream.clone();
        if self.primary_key_required && !schema.has_keys() {
            bail!(
                ErrorKind::MissingPrimaryKey,
                "Stream declares no key properties",
                stream
            );
        }

        let delta = self.registry.diff(&schema);
        if !delta.has_changes() {
            debug!(%stream, version = delta.version, "schema unchanged");
            self.registry.update(schema);
            return Ok(());
        }

        if delta.keys_changed {
            warn!(
                %stream,
                keys = ?schema.key_properties,
                "key properties changed, the table primary key is kept"
            );
        }

        let has_buffered = self.buffer.len(&stream) > 0;
        match self.schema_change_policy {
            SchemaChangePolicy::FlushFirst => {
                if has_buffered {
                    self.flush_stream(&stream, FlushReason::SchemaChanged).await?;
                }
                self.pool.wait_stream(&stream).await?;
                self.reconciler
                    .reconcile(&schema, self.engine.destination())
                    .await?;
            }
            SchemaChangePolicy::ReconcileFirst => {
                self.pool.wait_stream(&stream).await?;
                if let Err(err) = self
                    .reconciler
                    .reconcile(&schema, self.engine.destination())
                    .await
                {
                    let discarded = self.buffer.discard(&stream);
                    if discarded > 0 {
                        warn!(%stream, discarded, "discarding records buffered before failed schema change");
                    }

                    return Err(err);
                }

                if has_buffered {
                    self.flush_stream(&stream, FlushReason::SchemaChanged).await?;
                }
            }
        }

        let delta = self.registry.update(schema);
        info!(
            %stream,
            version = delta.version,
            added = delta.added.len(),
            changed = delta.changed.len(),
            removed = delta.removed.len(),
            "schema applied"
        );

        Ok(())
    }

    async fn handle_record(&mut self, message: RecordMessage) -> SinkResult<()> {
        let stream = StreamId::new(message.stream.clone());
        let Some(schema) = self.registry.get(&stream) else {
            bail!(
                ErrorKind::ProtocolError,
                "Record received before the schema of its stream",
                stream
            );
        };

        let sequence = self.sequences.get(&stream).copied().unwrap_or(0) + 1;
        let record = self
            .converter
            .convert(&message, schema, sequence, Utc::now())?;
        self.sequences.insert(stream.clone(), sequence);
        self.summary.records += 1;

        if let AppendOutcome::FlushRequired(reason, record) = self.buffer.append(record) {
            self.flush_stream(&stream, reason).await?;
            if let AppendOutcome::FlushRequired(reason, _) = self.buffer.append(record) {
                bail!(
                    ErrorKind::InvalidState,
                    "Record rejected by an empty buffer",
                    format!("{stream}: {reason}")
                );
            }
        }

        if self.buffer.is_full(&stream) {
            self.flush_stream(&stream, FlushReason::BatchFull).await?;
        }

        Ok(())
    }

    async fn handle_state(&mut self, message: StateMessage) -> SinkResult<()> {
        self.summary.states += 1;

        self.checkpoints
            .observe(message.value, self.sequences.clone())
            .await
    }

    fn handle_activate_version(&mut self, message: ActivateVersionMessage) {
        debug!(
            stream = message.stream,
            version = message.version,
            "ignoring activate version message"
        );
    }

    /// Hands the buffered records of `stream` to the worker pool.
    async fn flush_stream(&mut self, stream: &StreamId, reason: FlushReason) -> SinkResult<()> {
        let Some(batch) = self.buffer.drain(stream) else {
            return Ok(());
        };

        let Some(schema) = self.registry.get(stream).cloned() else {
            bail!(
                ErrorKind::InvalidState,
                "Flushing a stream without schema",
                stream
            );
        };
        if schema.version != batch.schema_version {
            bail!(
                ErrorKind::InvalidState,
                "Batch and schema versions differ",
                format!(
                    "{stream}: batch {} schema {}",
                    batch.schema_version, schema.version
                )
            );
        }

        let Some(table) = self.reconciler.table(stream).cloned() else {
            return Err(sink_error!(
                ErrorKind::InvalidState,
                "Flushing a stream without table",
                stream
            ));
        };

        debug!(
            %stream,
            %reason,
            records = batch.len(),
            first_sequence = batch.first_sequence,
            last_sequence = batch.last_sequence,
            "flushing batch"
        );

        let task = LoadTask::new(
            self.engine.clone(),
            self.checkpoints.clone(),
            batch,
            table,
            schema,
        );
        self.pool.spawn(stream.clone(), task.run()).await?;
        self.summary.batches_flushed += 1;

        Ok(())
    }

    async fn reap_loads(&mut self) -> SinkResult<()> {
        self.pool.reap_finished().await?;
        Ok(())
    }

    fn fail_stream(&mut self, stream: StreamId, err: SinkError) {
        let discarded = self.buffer.discard(&stream);
        error!(%stream, error = %err, discarded, "stream failed, skipping its messages");

        self.failed.insert(stream, err);
        self.summary.failed_streams = self.failed.keys().cloned().collect();
    }

    async fn refresh_summary(&mut self) {
        self.summary.checkpoints_emitted = self.checkpoints.emitted().await;
        self.summary.failed_streams = self.failed.keys().cloned().collect();
    }
}
