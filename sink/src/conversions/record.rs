use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::bail;
use crate::conversions::JsonConverter;
use crate::error::{ErrorKind, SinkResult};
use crate::messages::RecordMessage;
use crate::schema::{StreamSchema, BATCHED_AT_COLUMN, DELETED_AT_COLUMN, EXTRACTED_AT_COLUMN};
use crate::types::{Cell, Record};

/// Validates RECORD messages against the current schema of their stream.
#[derive(Debug, Clone, Copy)]
pub struct RecordConverter {
    metadata_columns: bool,
}

impl RecordConverter {
    pub fn new(metadata_columns: bool) -> Self {
        Self { metadata_columns }
    }

    /// Builds the [`Record`] of `message`.
    ///
    /// Property names are lower-cased and properties the schema does not declare are
    /// dropped. Every key property must carry a non-null value. With metadata columns, the
    /// extraction time comes from the message and `batched_at` is the acceptance time.
    pub fn convert(
        &self,
        message: &RecordMessage,
        schema: &StreamSchema,
        sequence: u64,
        batched_at: DateTime<Utc>,
    ) -> SinkResult<Record> {
        let mut cells = BTreeMap::new();
        for (name, value) in &message.record {
            let name = name.to_lowercase();
            let Some(column) = schema.column(&name) else {
                trace!(stream = %schema.stream, property = name, "dropping undeclared property");
                continue;
            };

            let cell = JsonConverter::to_cell(column, value)?;
            cells.insert(name, cell);
        }

        for key in &schema.key_properties {
            if cells.get(key).map_or(true, Cell::is_null) {
                bail!(
                    ErrorKind::ProtocolError,
                    "Record is missing a key property",
                    format!("{}.{key}", schema.stream)
                );
            }
        }

        if self.metadata_columns {
            let extracted_at = match message.time_extracted {
                Some(time) => Cell::Timestamp(time),
                None => Cell::Null,
            };
            cells.insert(EXTRACTED_AT_COLUMN.to_string(), extracted_at);
            cells.insert(BATCHED_AT_COLUMN.to_string(), Cell::Timestamp(batched_at));
            cells.entry(DELETED_AT_COLUMN.to_string()).or_insert(Cell::Null);
        }

        Ok(Record {
            stream: schema.stream.clone(),
            schema_version: schema.version,
            sequence,
            cells,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::messages::SchemaMessage;

    fn schema(metadata_columns: bool) -> StreamSchema {
        let message: SchemaMessage = serde_json::from_value(json!({
            "stream": "public-users",
            "schema": {
                "properties": {
                    "id": {"type": "integer"},
                    "Name": {"type": ["null", "string"]}
                }
            },
            "key_properties": ["id"]
        }))
        .unwrap();

        let mut schema = StreamSchema::from_message(&message, metadata_columns).unwrap();
        schema.version = 2;
        schema
    }

    fn record(record: serde_json::Value) -> RecordMessage {
        serde_json::from_value(json!({
            "stream": "public-users",
            "record": record,
            "time_extracted": "2024-01-01T00:00:00Z"
        }))
        .unwrap()
    }

    #[test]
    fn undeclared_properties_are_dropped() {
        let converter = RecordConverter::new(false);
        let record = converter
            .convert(
                &record(json!({"id": 1, "NAME": "ada", "extra": true})),
                &schema(false),
                7,
                Utc::now(),
            )
            .unwrap();

        assert_eq!(record.sequence, 7);
        assert_eq!(record.schema_version, 2);
        assert_eq!(
            record.cells,
            BTreeMap::from([
                ("id".to_string(), Cell::Integer(1)),
                ("name".to_string(), Cell::String("ada".to_string())),
            ])
        );
    }

    #[test]
    fn missing_key_is_a_protocol_error() {
        let converter = RecordConverter::new(false);

        for value in [json!({"name": "ada"}), json!({"id": null, "name": "ada"})] {
            let err = converter
                .convert(&record(value), &schema(false), 1, Utc::now())
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ProtocolError);
        }
    }

    #[test]
    fn metadata_columns_are_filled() {
        let converter = RecordConverter::new(true);
        let batched_at = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        let record = converter
            .convert(
                &record(json!({"id": 1, "_sdc_deleted_at": "2024-01-01T12:00:00Z"})),
                &schema(true),
                1,
                batched_at,
            )
            .unwrap();

        assert_eq!(
            record.cell(EXTRACTED_AT_COLUMN),
            &Cell::Timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(record.cell(BATCHED_AT_COLUMN), &Cell::Timestamp(batched_at));
        assert_eq!(
            record.cell(DELETED_AT_COLUMN),
            &Cell::String("2024-01-01T12:00:00Z".to_string())
        );
    }
}
