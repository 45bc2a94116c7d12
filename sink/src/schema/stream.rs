use std::collections::HashSet;

use serde_json::Value;

use crate::bail;
use crate::error::{ErrorKind, SinkResult};
use crate::messages::SchemaMessage;
use crate::sink_error;
use crate::types::StreamId;

/// Extraction time of a record, taken from the message's `time_extracted`.
pub const EXTRACTED_AT_COLUMN: &str = "_sdc_extracted_at";

/// Time the sink accepted a record.
pub const BATCHED_AT_COLUMN: &str = "_sdc_batched_at";

/// Deletion marker sent by the source.
pub const DELETED_AT_COLUMN: &str = "_sdc_deleted_at";

/// Types a schema property can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbstractType {
    String,
    DateTime,
    Time,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

/// A declared property of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    /// Lower-cased property name.
    pub name: String,
    /// Non-null types, in declaration order. Empty when the property declares no type.
    pub types: Vec<AbstractType>,
    pub nullable: bool,
    /// Schema version the column first appeared in.
    pub introduced_in: u64,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, types: Vec<AbstractType>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            types,
            nullable,
            introduced_in: 0,
        }
    }

    /// Returns whether two declarations of the same column are equivalent.
    pub fn same_declaration(&self, other: &ColumnSchema) -> bool {
        self.types == other.types && self.nullable == other.nullable
    }
}

/// The declared schema of a stream at one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSchema {
    pub stream: StreamId,
    /// Assigned by the [`crate::schema::SchemaRegistry`]; zero until registered.
    pub version: u64,
    pub columns: Vec<ColumnSchema>,
    /// Lower-cased key property names.
    pub key_properties: Vec<String>,
    /// Properties whose non-null value marks a record as deleted.
    pub delete_properties: Vec<String>,
}

impl StreamSchema {
    /// Builds the schema declared by a SCHEMA message.
    ///
    /// Property names are lower-cased. With `metadata_columns`, the `_sdc_*` columns are
    /// added and `_sdc_deleted_at` becomes the deletion marker.
    pub fn from_message(message: &SchemaMessage, metadata_columns: bool) -> SinkResult<Self> {
        let Some(properties) = message.schema.get("properties").and_then(Value::as_object)
        else {
            bail!(
                ErrorKind::ProtocolError,
                "Schema has no properties object",
                message.stream
            );
        };

        let mut columns = Vec::with_capacity(properties.len() + 3);
        let mut names = HashSet::with_capacity(properties.len());
        for (name, property) in properties {
            let name = name.to_lowercase();
            if !names.insert(name.clone()) {
                bail!(
                    ErrorKind::ProtocolError,
                    "Property declared twice after lower-casing",
                    format!("{}.{name}", message.stream)
                );
            }

            let (types, nullable) = parse_property(&name, property)?;
            columns.push(ColumnSchema::new(name, types, nullable));
        }

        let mut delete_properties = Vec::new();
        if metadata_columns {
            let metadata = [
                (EXTRACTED_AT_COLUMN, AbstractType::DateTime),
                (BATCHED_AT_COLUMN, AbstractType::DateTime),
                (DELETED_AT_COLUMN, AbstractType::String),
            ];
            for (name, typ) in metadata {
                if names.insert(name.to_string()) {
                    columns.push(ColumnSchema::new(name, vec![typ], true));
                }
            }
            delete_properties.push(DELETED_AT_COLUMN.to_string());
        }

        let mut key_properties = Vec::with_capacity(message.key_properties.len());
        for key in &message.key_properties {
            let key = key.to_lowercase();
            if !names.contains(&key) {
                bail!(
                    ErrorKind::ProtocolError,
                    "Key property is not declared in the schema",
                    format!("{}.{key}", message.stream)
                );
            }
            if !key_properties.contains(&key) {
                key_properties.push(key);
            }
        }

        Ok(Self {
            stream: StreamId::new(message.stream.clone()),
            version: 0,
            columns,
            key_properties,
            delete_properties,
        })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn has_keys(&self) -> bool {
        !self.key_properties.is_empty()
    }

    pub fn is_key(&self, name: &str) -> bool {
        self.key_properties.iter().any(|key| key == name)
    }
}

/// Returns the non-null types of a property and whether it accepts null.
///
/// Type arrays and `anyOf` alternatives are flattened. A property without any type accepts
/// every value.
fn parse_property(name: &str, property: &Value) -> SinkResult<(Vec<AbstractType>, bool)> {
    let mut types = Vec::new();
    let mut nullable = false;
    collect_types(name, property, &mut types, &mut nullable)?;

    if types.is_empty() {
        nullable = true;
    }

    Ok((types, nullable))
}

fn collect_types(
    name: &str,
    property: &Value,
    types: &mut Vec<AbstractType>,
    nullable: &mut bool,
) -> SinkResult<()> {
    let Some(property) = property.as_object() else {
        return Ok(());
    };

    if let Some(alternatives) = property.get("anyOf").and_then(Value::as_array) {
        for alternative in alternatives {
            collect_types(name, alternative, types, nullable)?;
        }
    }

    let format = property.get("format").and_then(Value::as_str);
    let declared: Vec<&str> = match property.get("type") {
        None => Vec::new(),
        Some(Value::String(typ)) => vec![typ.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        Some(other) => {
            return Err(sink_error!(
                ErrorKind::ProtocolError,
                "Property type must be a string or an array",
                format!("{name}: {other}")
            ));
        }
    };

    for typ in declared {
        let typ = match typ {
            "null" => {
                *nullable = true;
                continue;
            }
            "string" => match format {
                Some("date-time") => AbstractType::DateTime,
                Some("time") => AbstractType::Time,
                _ => AbstractType::String,
            },
            "integer" => AbstractType::Integer,
            "number" => AbstractType::Number,
            "boolean" => AbstractType::Boolean,
            "object" => AbstractType::Object,
            "array" => AbstractType::Array,
            other => {
                return Err(sink_error!(
                    ErrorKind::UnsupportedType,
                    "Property declares an unknown type",
                    format!("{name}: {other}")
                ));
            }
        };

        if !types.contains(&typ) {
            types.push(typ);
        }
    }

    Ok(())
}
