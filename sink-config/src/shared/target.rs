use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::shared::{
    DestinationConfig, RetryConfig, SchemaMapping, SelectPermissions, ValidationError,
};
use crate::Config;

/// Default maximum number of rows buffered per stream before a flush.
pub const DEFAULT_BATCH_SIZE: usize = 100_000;

/// Default number of loads running at the same time.
pub const DEFAULT_MAX_PARALLEL_LOADS: u16 = 4;

/// Default bound on waiting for in-flight loads at shutdown.
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 30_000;

/// How object and array properties are stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NestedValuesMode {
    /// Stored as a JSON column.
    #[default]
    Json,
    /// Declaring such a property fails the stream.
    Reject,
}

/// Ordering between flushing old-version records and applying DDL on a schema change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaChangePolicy {
    /// Flush the buffered records of the previous version, then reconcile the table.
    #[default]
    FlushFirst,
    /// Reconcile the table first; buffered records are discarded if that fails.
    ReconcileFirst,
}

/// Complete configuration of the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TargetConfig {
    /// Maximum number of records buffered per stream before a flush is forced.
    #[serde(default = "default_batch_size", alias = "batch_size_rows")]
    pub batch_size: usize,
    /// Maximum age of a stream buffer before it is flushed, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_batch_fill_ms: Option<u64>,
    /// Destination schema used when no mapping matches the stream's source schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_target_schema: Option<String>,
    /// Roles granted `SELECT` on tables created in the default target schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_target_schema_select_permission: Option<SelectPermissions>,
    /// Per source schema destination settings.
    #[serde(default)]
    pub schema_mapping: HashMap<String, SchemaMapping>,
    /// Adds `_sdc_extracted_at`, `_sdc_batched_at` and `_sdc_deleted_at` columns.
    #[serde(default)]
    pub add_metadata_columns: bool,
    /// Deletes rows whose `_sdc_deleted_at` is set instead of keeping them.
    ///
    /// Implies metadata columns.
    #[serde(default)]
    pub hard_delete: bool,
    /// Fails a stream that declares no key properties.
    #[serde(default)]
    pub primary_key_required: bool,
    #[serde(default)]
    pub nested_values: NestedValuesMode,
    #[serde(default)]
    pub schema_change_policy: SchemaChangePolicy,
    /// Maximum number of loads running at a time, across all streams.
    #[serde(default = "default_max_parallel_loads")]
    pub max_parallel_loads: u16,
    /// Maximum time to wait for in-flight loads when shutting down.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    /// Retry policy for transient load failures.
    #[serde(default)]
    pub load_retry: RetryConfig,
    #[serde(default)]
    pub destination: DestinationConfig,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_parallel_loads() -> u16 {
    DEFAULT_MAX_PARALLEL_LOADS
}

fn default_drain_timeout_ms() -> u64 {
    DEFAULT_DRAIN_TIMEOUT_MS
}

impl TargetConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.batch_size == 0 {
            return Err(ValidationError::BatchSizeZero);
        }

        if self.max_parallel_loads == 0 {
            return Err(ValidationError::MaxParallelLoadsZero);
        }

        self.load_retry.validate()?;
        self.destination.validate()
    }

    /// Returns whether metadata columns are written, which `hard_delete` forces on.
    pub fn metadata_columns_enabled(&self) -> bool {
        self.add_metadata_columns || self.hard_delete
    }

    /// Returns the mapping for `source_schema`, matched case-insensitively.
    pub fn schema_mapping_for(&self, source_schema: &str) -> Option<&SchemaMapping> {
        self.schema_mapping.get(source_schema).or_else(|| {
            self.schema_mapping
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(source_schema))
                .map(|(_, mapping)| mapping)
        })
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_batch_fill_ms: None,
            default_target_schema: None,
            default_target_schema_select_permission: None,
            schema_mapping: HashMap::new(),
            add_metadata_columns: false,
            hard_delete: false,
            primary_key_required: false,
            nested_values: NestedValuesMode::default(),
            schema_change_policy: SchemaChangePolicy::default(),
            max_parallel_loads: DEFAULT_MAX_PARALLEL_LOADS,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
            load_retry: RetryConfig::default(),
            destination: DestinationConfig::default(),
        }
    }
}

impl Config for TargetConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["default_target_schema_select_permission"];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: TargetConfig = serde_json::from_str("{}").unwrap();

        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.max_parallel_loads, 4);
        assert_eq!(config.drain_timeout_ms, 30_000);
        assert_eq!(config.nested_values, NestedValuesMode::Json);
        assert_eq!(config.schema_change_policy, SchemaChangePolicy::FlushFirst);
        assert!(!config.primary_key_required);
        assert!(matches!(config.destination, DestinationConfig::Memory));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn batch_size_rows_alias_is_accepted() {
        let config: TargetConfig = serde_json::from_str(r#"{"batch_size_rows": 10}"#).unwrap();
        assert_eq!(config.batch_size, 10);
    }

    #[test]
    fn hard_delete_implies_metadata_columns() {
        let config = TargetConfig {
            hard_delete: true,
            ..TargetConfig::default()
        };
        assert!(config.metadata_columns_enabled());
        assert!(!TargetConfig::default().metadata_columns_enabled());
    }

    #[test]
    fn zero_values_are_rejected() {
        let config = TargetConfig {
            batch_size: 0,
            ..TargetConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::BatchSizeZero)
        ));

        let config = TargetConfig {
            max_parallel_loads: 0,
            ..TargetConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::MaxParallelLoadsZero)
        ));
    }

    #[test]
    fn postgres_destination_is_parsed() {
        let config: TargetConfig = serde_json::from_str(
            r#"{
                "destination": {
                    "postgres": {
                        "host": "db",
                        "name": "warehouse",
                        "username": "loader",
                        "password": "pw"
                    }
                },
                "schema_mapping": {"Sales": {"target_schema": "sales_raw"}}
            }"#,
        )
        .unwrap();

        let DestinationConfig::Postgres(connection) = &config.destination else {
            panic!("expected a postgres destination");
        };
        assert_eq!(connection.port, 5432);
        assert!(!connection.tls.enabled);
        assert_eq!(
            config.schema_mapping_for("sales").unwrap().target_schema,
            "sales_raw"
        );
    }
}
