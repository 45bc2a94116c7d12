//! Shared helpers for the sink integration tests.
//!
//! Builds message lines, configurations and in-memory destinations, and drives a
//! [`MessageReader`] over a list of lines.

#![allow(dead_code)]

use std::future::Future;
use std::time::Duration;

use serde_json::{json, Value};
use sink::checkpoint::MemoryEmitter;
use sink::destination::memory::MemoryDestination;
use sink::error::SinkResult;
use sink::reader::{MessageReader, RunSummary};
use sink::types::TableName;
use sink_config::shared::{RetryConfig, TargetConfig};

/// Destination schema every test stream is written to.
pub const TARGET_SCHEMA: &str = "raw";

pub fn config() -> TargetConfig {
    TargetConfig {
        default_target_schema: Some(TARGET_SCHEMA.to_string()),
        load_retry: RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_factor: 2.0,
        },
        ..TargetConfig::default()
    }
}

pub fn table(name: &str) -> TableName {
    TableName::new(TARGET_SCHEMA, name)
}

pub fn schema_line(stream: &str, properties: Value, keys: &[&str]) -> String {
    json!({
        "type": "SCHEMA",
        "stream": stream,
        "schema": {"type": "object", "properties": properties},
        "key_properties": keys,
    })
    .to_string()
}

pub fn record_line(stream: &str, record: Value) -> String {
    json!({
        "type": "RECORD",
        "stream": stream,
        "record": record,
        "time_extracted": "2024-03-01T10:00:00Z",
    })
    .to_string()
}

pub fn state_line(value: Value) -> String {
    json!({"type": "STATE", "value": value}).to_string()
}

/// Feeds `lines` to a new reader and finishes the run.
pub async fn run_lines(
    config: &TargetConfig,
    destination: &MemoryDestination,
    emitter: &MemoryEmitter,
    lines: &[String],
) -> SinkResult<RunSummary> {
    let mut reader = MessageReader::new(config, destination.clone(), emitter.clone());
    for line in lines {
        reader.process_line(line).await?;
    }

    reader.finish().await
}

/// Polls `condition` until it holds, panicking after a few seconds.
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    assert!(waited.is_ok(), "condition not met in time");
}
