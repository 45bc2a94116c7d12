use std::collections::HashMap;

use crate::schema::StreamSchema;
use crate::types::StreamId;

/// Difference between a stream's recorded schema and a new declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDelta {
    pub stream: StreamId,
    /// Version of the recorded schema, [`None`] for a stream seen for the first time.
    pub previous_version: Option<u64>,
    /// Version the new declaration gets.
    pub version: u64,
    pub added: Vec<String>,
    /// Columns whose declared types or nullability changed.
    pub changed: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
    pub keys_changed: bool,
}

impl SchemaDelta {
    pub fn is_new_stream(&self) -> bool {
        self.previous_version.is_none()
    }

    /// Returns whether the declaration differs from the recorded schema.
    pub fn has_changes(&self) -> bool {
        self.is_new_stream()
            || !self.added.is_empty()
            || !self.changed.is_empty()
            || !self.removed.is_empty()
            || self.keys_changed
    }
}

/// Latest declared schema of every stream.
///
/// Versions start at 1 and grow by one with every declaration that changes the schema.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<StreamId, StreamSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current schema of `stream`.
    pub fn get(&self, stream: &StreamId) -> Option<&StreamSchema> {
        self.schemas.get(stream)
    }

    /// Computes the delta `schema` would produce, without recording it.
    pub fn diff(&self, schema: &StreamSchema) -> SchemaDelta {
        let Some(current) = self.schemas.get(&schema.stream) else {
            return SchemaDelta {
                stream: schema.stream.clone(),
                previous_version: None,
                version: 1,
                added: schema.columns.iter().map(|c| c.name.clone()).collect(),
                changed: vec![],
                removed: vec![],
                unchanged: vec![],
                keys_changed: false,
            };
        };

        let mut added = Vec::new();
        let mut changed = Vec::new();
        let mut unchanged = Vec::new();
        for column in &schema.columns {
            match current.column(&column.name) {
                None => added.push(column.name.clone()),
                Some(previous) if previous.same_declaration(column) => {
                    unchanged.push(column.name.clone())
                }
                Some(_) => changed.push(column.name.clone()),
            }
        }

        let removed = current
            .columns
            .iter()
            .filter(|column| schema.column(&column.name).is_none())
            .map(|column| column.name.clone())
            .collect();

        let mut delta = SchemaDelta {
            stream: schema.stream.clone(),
            previous_version: Some(current.version),
            version: current.version,
            added,
            changed,
            removed,
            unchanged,
            keys_changed: current.key_properties != schema.key_properties
                || current.delete_properties != schema.delete_properties,
        };
        if delta.has_changes() {
            delta.version += 1;
        }

        delta
    }

    /// Records `schema` as the current schema of its stream and returns the delta.
    ///
    /// The version and the `introduced_in` of every column are assigned here.
    pub fn update(&mut self, mut schema: StreamSchema) -> SchemaDelta {
        let delta = self.diff(&schema);
        schema.version = delta.version;

        let current = self.schemas.get(&schema.stream);
        for column in &mut schema.columns {
            column.introduced_in = current
                .and_then(|current| current.column(&column.name))
                .map(|previous| previous.introduced_in)
                .unwrap_or(delta.version);
        }

        self.schemas.insert(schema.stream.clone(), schema);

        delta
    }
}
