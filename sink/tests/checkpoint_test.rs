use serde_json::json;
use sink::checkpoint::MemoryEmitter;
use sink::destination::memory::MemoryDestination;
use sink::reader::MessageReader;
use sink::types::ColumnType;
use sink_config::shared::{SchemaChangePolicy, TargetConfig};
use sink_telemetry::tracing::init_test_tracing;

use crate::common::{config, record_line, run_lines, schema_line, state_line};

mod common;

fn users_schema() -> String {
    schema_line("users", json!({"id": {"type": "integer"}}), &["id"])
}

fn orders_schema() -> String {
    schema_line("orders", json!({"id": {"type": "integer"}}), &["id"])
}

#[tokio::test]
async fn state_without_pending_records_is_emitted_immediately() {
    init_test_tracing();
    let emitter = MemoryEmitter::new();
    let mut reader = MessageReader::new(&config(), MemoryDestination::new(), emitter.clone());

    reader
        .process_line(&state_line(json!({"bookmark": 0})))
        .await
        .unwrap();

    assert_eq!(emitter.emitted().await, vec![json!({"bookmark": 0})]);
}

#[tokio::test]
async fn state_waits_for_the_records_it_covers() {
    init_test_tracing();
    let emitter = MemoryEmitter::new();
    let destination = MemoryDestination::new();
    let mut reader = MessageReader::new(&config(), destination.clone(), emitter.clone());

    for line in [
        users_schema(),
        record_line("users", json!({"id": 1})),
        state_line(json!({"users": 1})),
    ] {
        reader.process_line(&line).await.unwrap();
    }
    assert!(emitter.emitted().await.is_empty());
    assert_eq!(destination.committed_writes().await, 0);

    let summary = reader.finish().await.unwrap();
    assert_eq!(summary.checkpoints_emitted, 1);
    assert_eq!(emitter.emitted().await, vec![json!({"users": 1})]);
}

#[tokio::test]
async fn states_are_emitted_in_arrival_order() {
    init_test_tracing();
    let emitter = MemoryEmitter::new();
    let config = TargetConfig {
        batch_size: 1,
        ..config()
    };

    run_lines(
        &config,
        &MemoryDestination::new(),
        &emitter,
        &[
            users_schema(),
            orders_schema(),
            record_line("users", json!({"id": 1})),
            state_line(json!({"step": 1})),
            record_line("orders", json!({"id": 1})),
            state_line(json!({"step": 2})),
            state_line(json!({"step": 3})),
            record_line("users", json!({"id": 2})),
            state_line(json!({"step": 4})),
        ],
    )
    .await
    .unwrap();

    assert_eq!(
        emitter.emitted().await,
        vec![
            json!({"step": 1}),
            json!({"step": 2}),
            json!({"step": 3}),
            json!({"step": 4})
        ]
    );
}

#[tokio::test]
async fn state_is_not_emitted_when_a_covered_load_fails() {
    init_test_tracing();
    let emitter = MemoryEmitter::new();
    let destination = MemoryDestination::new();
    destination
        .fail_next_writes(vec![sink::error::ErrorKind::DestinationFatal])
        .await;

    let result = run_lines(
        &config(),
        &destination,
        &emitter,
        &[
            users_schema(),
            record_line("users", json!({"id": 1})),
            state_line(json!({"users": 1})),
        ],
    )
    .await;

    assert!(result.is_err());
    assert!(emitter.emitted().await.is_empty());
}

#[tokio::test]
async fn failed_stream_holds_back_later_states() {
    init_test_tracing();
    let emitter = MemoryEmitter::new();
    let destination =
        MemoryDestination::new().with_disallowed_widening(ColumnType::Integer, ColumnType::Text);
    let config = TargetConfig {
        schema_change_policy: SchemaChangePolicy::ReconcileFirst,
        ..config()
    };

    let result = run_lines(
        &config,
        &destination,
        &emitter,
        &[
            users_schema(),
            orders_schema(),
            record_line("users", json!({"id": 1})),
            schema_line("users", json!({"id": {"type": "string"}}), &["id"]),
            record_line("orders", json!({"id": 1})),
            state_line(json!({"step": 1})),
        ],
    )
    .await;

    assert!(result.is_err());
    assert!(emitter.emitted().await.is_empty());
}
