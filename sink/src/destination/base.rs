use std::future::Future;

use crate::error::SinkResult;
use crate::load::WritePlan;
use crate::types::{ColumnDef, ColumnType, TableName, TableState};

/// Capabilities the sink needs from a destination.
///
/// DDL operations are issued one at a time by the table reconciler. A [`WritePlan`] must be
/// applied as one unit: either every row of it is committed or none is.
pub trait Destination {
    /// Returns the current structure of `table`, or [`None`] if it does not exist.
    fn describe_table(
        &self,
        table: &TableName,
    ) -> impl Future<Output = SinkResult<Option<TableState>>> + Send;

    /// Creates `schema` unless it already exists.
    fn create_schema(&self, schema: &str) -> impl Future<Output = SinkResult<()>> + Send;

    fn create_table(
        &self,
        table: &TableName,
        columns: &[ColumnDef],
        primary_key: &[String],
    ) -> impl Future<Output = SinkResult<()>> + Send;

    fn add_column(
        &self,
        table: &TableName,
        column: &ColumnDef,
    ) -> impl Future<Output = SinkResult<()>> + Send;

    fn alter_column_type(
        &self,
        table: &TableName,
        column: &str,
        typ: ColumnType,
    ) -> impl Future<Output = SinkResult<()>> + Send;

    /// Creates an index on a single column unless it already exists.
    fn create_index(
        &self,
        table: &TableName,
        column: &str,
    ) -> impl Future<Output = SinkResult<()>> + Send;

    fn grant_select(
        &self,
        table: &TableName,
        role: &str,
    ) -> impl Future<Output = SinkResult<()>> + Send;

    /// Applies `plan` atomically and returns the number of affected rows.
    fn write(&self, plan: &WritePlan) -> impl Future<Output = SinkResult<u64>> + Send;

    /// Returns whether a column of type `from` can be changed to the wider type `to`.
    fn supports_widening(&self, from: ColumnType, to: ColumnType) -> bool {
        let _ = (from, to);
        true
    }
}
