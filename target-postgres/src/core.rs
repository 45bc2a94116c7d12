use std::fmt;

use sink::checkpoint::{StateEmitter, StdoutEmitter};
use sink::destination::memory::MemoryDestination;
use sink::destination::postgres::PostgresDestination;
use sink::destination::Destination;
use sink::pipeline::Pipeline;
use sink::reader::RunSummary;
use sink_config::shared::{
    DestinationConfig, PgConnectionConfig, RetryConfig, SchemaMapping, TargetConfig,
};
use tokio::io::BufReader;
use tracing::{info, warn};

pub async fn start_target(config: TargetConfig) -> anyhow::Result<()> {
    info!("starting target");

    log_config(&config);

    // Each destination gets its own pipeline type; dispatch stays static.
    let summary = match &config.destination {
        DestinationConfig::Memory => {
            let destination = MemoryDestination::new();
            let pipeline = Pipeline::new(&config, destination, StdoutEmitter::new());

            start_pipeline(pipeline).await?
        }
        DestinationConfig::Postgres(connection) => {
            let destination = PostgresDestination::connect(connection.clone()).await?;
            let pipeline = Pipeline::new(&config, destination, StdoutEmitter::new());

            start_pipeline(pipeline).await?
        }
    };

    info!(
        messages = summary.messages,
        records = summary.records,
        batches_flushed = summary.batches_flushed,
        checkpoints_emitted = summary.checkpoints_emitted,
        interrupted = summary.interrupted,
        "target completed"
    );

    Ok(())
}

fn log_config(config: &TargetConfig) {
    log_destination_config(&config.destination);
    log_target_config(config);
    log_load_retry(&config.load_retry);

    for (source_schema, mapping) in &config.schema_mapping {
        log_schema_mapping(source_schema, mapping);
    }
}

fn log_destination_config(config: &DestinationConfig) {
    match config {
        DestinationConfig::Memory => {
            info!("memory config");
        }
        DestinationConfig::Postgres(connection) => {
            log_pg_connection_config(connection);
        }
    }
}

fn log_pg_connection_config(config: &PgConnectionConfig) {
    info!(
        host = config.host,
        port = config.port,
        dbname = config.name,
        username = config.username,
        tls_enabled = config.tls.enabled,
        "destination postgres connection config",
    );
}

fn log_target_config(config: &TargetConfig) {
    info!(
        batch_size = config.batch_size,
        max_batch_fill_ms = config.max_batch_fill_ms,
        default_target_schema = config.default_target_schema,
        add_metadata_columns = config.add_metadata_columns,
        hard_delete = config.hard_delete,
        primary_key_required = config.primary_key_required,
        nested_values = ?config.nested_values,
        schema_change_policy = ?config.schema_change_policy,
        max_parallel_loads = config.max_parallel_loads,
        drain_timeout_ms = config.drain_timeout_ms,
        "target config"
    );
}

fn log_schema_mapping(source_schema: &str, mapping: &SchemaMapping) {
    info!(
        source_schema,
        target_schema = mapping.target_schema,
        indexed_tables = mapping.indices.len(),
        "schema mapping config"
    );
}

fn log_load_retry(config: &RetryConfig) {
    info!(
        max_attempts = config.max_attempts,
        initial_delay_ms = config.initial_delay_ms,
        max_delay_ms = config.max_delay_ms,
        backoff_factor = config.backoff_factor,
        "load retry config"
    )
}

async fn start_pipeline<D, E>(pipeline: Pipeline<D, E>) -> anyhow::Result<RunSummary>
where
    D: Destination + Clone + Send + Sync + fmt::Debug + 'static,
    E: StateEmitter + Clone + Send + Sync + fmt::Debug + 'static,
{
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;

    // Spawn a task to listen for shutdown signals and trigger shutdown.
    let shutdown_tx = pipeline.shutdown_tx();
    let shutdown_handle = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT (Ctrl+C) received, shutting down pipeline");
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down pipeline");
            }
        }

        if let Err(e) = shutdown_tx.shutdown() {
            warn!("failed to send shutdown signal: {:?}", e);
        }
    });

    let input = BufReader::new(tokio::io::stdin());
    let result = pipeline.run(input).await;

    // The signal task outlives a pipeline that reached the end of its input.
    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    Ok(result?)
}
