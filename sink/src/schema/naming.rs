use std::collections::HashMap;

use sink_config::shared::{SchemaMapping, TargetConfig};

use crate::bail;
use crate::error::{ErrorKind, SinkResult};
use crate::types::{StreamId, TableName};

/// Separator between the catalog, schema and table parts of a stream name.
const STREAM_NAME_SEPARATOR: char = '-';

/// Where a stream is written to and what is set up when its table is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTarget {
    pub table: TableName,
    /// Roles granted `SELECT` on the table.
    pub select_roles: Vec<String>,
    /// Columns that get their own index.
    pub indices: Vec<String>,
}

/// Source location encoded in a stream name: `table`, `schema-table` or `catalog-schema-table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceName {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub table: String,
}

impl SourceName {
    pub fn parse(stream: &str) -> Self {
        let parts: Vec<&str> = stream.split(STREAM_NAME_SEPARATOR).collect();

        match parts.as_slice() {
            [schema, table] => Self {
                catalog: None,
                schema: Some(schema.to_string()),
                table: table.to_string(),
            },
            [catalog, schema, rest @ ..] if !rest.is_empty() => Self {
                catalog: Some(catalog.to_string()),
                schema: Some(schema.to_string()),
                table: rest.join("_"),
            },
            _ => Self {
                catalog: None,
                schema: None,
                table: stream.to_string(),
            },
        }
    }
}

/// Resolves streams to destination tables from `default_target_schema` and `schema_mapping`.
#[derive(Debug, Clone)]
pub struct TableNaming {
    default_target_schema: Option<String>,
    default_select_roles: Vec<String>,
    schema_mapping: HashMap<String, SchemaMapping>,
}

impl TableNaming {
    pub fn new(config: &TargetConfig) -> Self {
        let default_target_schema = config
            .default_target_schema
            .as_ref()
            .map(|schema| schema.trim().to_string())
            .filter(|schema| !schema.is_empty());

        let default_select_roles = config
            .default_target_schema_select_permission
            .as_ref()
            .map(|permissions| permissions.roles())
            .unwrap_or_default();

        let schema_mapping = config
            .schema_mapping
            .iter()
            .map(|(source, mapping)| (source.to_lowercase(), mapping.clone()))
            .collect();

        Self {
            default_target_schema,
            default_select_roles,
            schema_mapping,
        }
    }

    /// Returns the destination table of `stream`.
    ///
    /// Fails with [`ErrorKind::MissingTargetSchema`] when neither a mapping for the source
    /// schema nor a default target schema is configured.
    pub fn resolve(&self, stream: &StreamId) -> SinkResult<TableTarget> {
        let source = SourceName::parse(stream.as_str());
        let table_name = safe_table_name(&source.table);

        let mapping = source
            .schema
            .as_ref()
            .and_then(|schema| self.schema_mapping.get(&schema.to_lowercase()));

        let (target_schema, select_roles, indices) = match mapping {
            Some(mapping) => {
                let roles = match &mapping.target_schema_select_permissions {
                    Some(permissions) => permissions.roles(),
                    None => self.default_select_roles.clone(),
                };
                let indices = mapping
                    .indices
                    .iter()
                    .find(|(table, _)| safe_table_name(table) == table_name)
                    .map(|(_, columns)| columns.iter().map(|c| c.to_lowercase()).collect())
                    .unwrap_or_default();

                (mapping.target_schema.clone(), roles, indices)
            }
            None => match &self.default_target_schema {
                Some(schema) => (schema.clone(), self.default_select_roles.clone(), vec![]),
                None => bail!(
                    ErrorKind::MissingTargetSchema,
                    "No target schema configured for stream",
                    stream
                ),
            },
        };

        Ok(TableTarget {
            table: TableName::new(target_schema, table_name),
            select_roles,
            indices,
        })
    }
}

/// Lower-cases a table name and replaces characters that separate identifiers.
fn safe_table_name(name: &str) -> String {
    name.to_lowercase().replace(['.', '-'], "_")
}
