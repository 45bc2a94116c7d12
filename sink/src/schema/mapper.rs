use sink_config::shared::NestedValuesMode;

use crate::error::{ErrorKind, SinkResult};
use crate::schema::{AbstractType, ColumnSchema};
use crate::sink_error;
use crate::types::ColumnType;

/// Maps declared property types to destination column types.
#[derive(Debug, Clone, Copy)]
pub struct TypeMapper {
    nested_values: NestedValuesMode,
}

impl TypeMapper {
    pub fn new(nested_values: NestedValuesMode) -> Self {
        Self { nested_values }
    }

    /// Maps a single abstract type.
    ///
    /// Objects and arrays are stored as JSON unless nested values are rejected, in which
    /// case [`ErrorKind::UnsupportedType`] is returned.
    pub fn map(&self, column: &str, typ: AbstractType) -> SinkResult<ColumnType> {
        let column_type = match typ {
            AbstractType::String => ColumnType::Text,
            AbstractType::DateTime => ColumnType::Timestamp,
            AbstractType::Time => ColumnType::Time,
            AbstractType::Integer => ColumnType::Integer,
            AbstractType::Number => ColumnType::Number,
            AbstractType::Boolean => ColumnType::Boolean,
            AbstractType::Object | AbstractType::Array => match self.nested_values {
                NestedValuesMode::Json => ColumnType::Json,
                NestedValuesMode::Reject => {
                    return Err(sink_error!(
                        ErrorKind::UnsupportedType,
                        "Nested values are not accepted",
                        column
                    ));
                }
            },
        };

        Ok(column_type)
    }

    /// Returns the type a column gets from its declaration alone.
    ///
    /// Union members are folded with [`ColumnType::lub`]; a column without any declared type
    /// is text.
    pub fn declared_type(&self, column: &ColumnSchema) -> SinkResult<ColumnType> {
        let mut resolved: Option<ColumnType> = None;
        for typ in &column.types {
            let mapped = self.map(&column.name, *typ)?;
            resolved = Some(match resolved {
                Some(current) => current.lub(mapped),
                None => mapped,
            });
        }

        Ok(resolved.unwrap_or(ColumnType::Text))
    }

    /// Resolves the type of `column` given the type already recorded for it, if any.
    ///
    /// The result is never narrower than `existing`. Columns of a type the sink does not
    /// model keep that type.
    pub fn resolve(
        &self,
        column: &ColumnSchema,
        existing: Option<ColumnType>,
    ) -> SinkResult<ColumnType> {
        let declared = self.declared_type(column)?;

        let resolved = match existing {
            Some(ColumnType::Other) => ColumnType::Other,
            Some(existing) => existing.lub(declared),
            None => declared,
        };

        Ok(resolved)
    }
}
