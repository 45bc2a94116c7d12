use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::destination::base::Destination;
use crate::error::{ErrorKind, SinkResult};
use crate::load::{PlanKind, WritePlan};
use crate::sink_error;
use crate::types::{Cell, ColumnDef, ColumnType, TableName, TableState};

/// A row stored by the [`MemoryDestination`], by column name.
pub type MemoryRow = BTreeMap<String, Cell>;

#[derive(Debug)]
struct MemoryTable {
    state: TableState,
    rows: Vec<MemoryRow>,
}

#[derive(Debug, Default)]
struct Inner {
    schemas: HashSet<String>,
    tables: HashMap<TableName, MemoryTable>,
    indices: Vec<(TableName, String)>,
    grants: Vec<(TableName, String)>,
    committed_writes: usize,
    failing_writes: Vec<ErrorKind>,
    failing_ddl: Vec<ErrorKind>,
    write_delay: Option<Duration>,
}

impl Inner {
    fn next_ddl_failure(&mut self) -> SinkResult<()> {
        if self.failing_ddl.is_empty() {
            return Ok(());
        }

        let kind = self.failing_ddl.remove(0);
        Err(sink_error!(kind, "Injected DDL failure"))
    }

    fn table_mut(&mut self, table: &TableName) -> SinkResult<&mut MemoryTable> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| sink_error!(ErrorKind::DestinationFatal, "Table does not exist", table))
    }
}

/// Destination keeping tables in memory.
///
/// Used for dry runs and tests. Write plans are applied to a copy of the table that replaces
/// the original only when the whole plan succeeded. Failures can be injected for writes and
/// DDL, and widenings can be refused.
#[derive(Debug, Clone)]
pub struct MemoryDestination {
    inner: Arc<Mutex<Inner>>,
    disallowed_widenings: Arc<Vec<(ColumnType, ColumnType)>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            disallowed_widenings: Arc::new(Vec::new()),
        }
    }

    /// Returns a destination refusing to change columns of type `from` to type `to`.
    pub fn with_disallowed_widening(mut self, from: ColumnType, to: ColumnType) -> Self {
        Arc::make_mut(&mut self.disallowed_widenings).push((from, to));
        self
    }

    /// Adds an existing table, as if it had been created outside of the sink.
    pub async fn seed_table(&self, state: TableState, rows: Vec<MemoryRow>) {
        let mut inner = self.inner.lock().await;
        inner.schemas.insert(state.name.schema.clone());
        inner
            .tables
            .insert(state.name.clone(), MemoryTable { state, rows });
    }

    /// Makes the next writes fail, one per given kind, in order.
    pub async fn fail_next_writes(&self, kinds: Vec<ErrorKind>) {
        let mut inner = self.inner.lock().await;
        inner.failing_writes.extend(kinds);
    }

    /// Makes the next DDL operations fail, one per given kind, in order.
    pub async fn fail_next_ddl(&self, kinds: Vec<ErrorKind>) {
        let mut inner = self.inner.lock().await;
        inner.failing_ddl.extend(kinds);
    }

    /// Delays every write by `delay` before it is applied.
    pub async fn set_write_delay(&self, delay: Duration) {
        let mut inner = self.inner.lock().await;
        inner.write_delay = Some(delay);
    }

    pub async fn table_state(&self, table: &TableName) -> Option<TableState> {
        let inner = self.inner.lock().await;
        inner.tables.get(table).map(|table| table.state.clone())
    }

    pub async fn rows(&self, table: &TableName) -> Vec<MemoryRow> {
        let inner = self.inner.lock().await;
        inner
            .tables
            .get(table)
            .map(|table| table.rows.clone())
            .unwrap_or_default()
    }

    pub async fn schemas(&self) -> HashSet<String> {
        let inner = self.inner.lock().await;
        inner.schemas.clone()
    }

    pub async fn indices(&self) -> Vec<(TableName, String)> {
        let inner = self.inner.lock().await;
        inner.indices.clone()
    }

    pub async fn grants(&self) -> Vec<(TableName, String)> {
        let inner = self.inner.lock().await;
        inner.grants.clone()
    }

    /// Returns the number of write plans committed so far.
    pub async fn committed_writes(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.committed_writes
    }
}

impl Default for MemoryDestination {
    fn default() -> Self {
        Self::new()
    }
}

fn same_key(row: &MemoryRow, key_columns: &[String], key: &[Cell]) -> bool {
    key_columns.iter().zip(key).all(|(column, cell)| {
        row.get(column).unwrap_or(&Cell::Null).key_fragment() == cell.key_fragment()
    })
}

fn apply_plan(rows: &mut Vec<MemoryRow>, plan: &WritePlan) -> u64 {
    let key_positions: Vec<usize> = plan
        .key_columns
        .iter()
        .filter_map(|key| plan.column_index(key))
        .collect();

    match &plan.kind {
        PlanKind::Append { rows: new_rows } => {
            for row in new_rows {
                rows.push(
                    plan.columns
                        .iter()
                        .map(|column| column.name.clone())
                        .zip(row.iter().cloned())
                        .collect(),
                );
            }

            new_rows.len() as u64
        }
        PlanKind::Merge { upserts, deletes } => {
            let mut affected = 0;

            for key in deletes {
                let before = rows.len();
                rows.retain(|row| !same_key(row, &plan.key_columns, key));
                affected += (before - rows.len()) as u64;
            }

            for upsert in upserts {
                let key: Vec<Cell> = key_positions.iter().map(|i| upsert[*i].clone()).collect();
                let values = plan
                    .columns
                    .iter()
                    .map(|column| column.name.clone())
                    .zip(upsert.iter().cloned());

                match rows
                    .iter_mut()
                    .find(|row| same_key(row, &plan.key_columns, &key))
                {
                    Some(existing) => existing.extend(values),
                    None => rows.push(values.collect()),
                }
                affected += 1;
            }

            affected
        }
    }
}

impl Destination for MemoryDestination {
    async fn describe_table(&self, table: &TableName) -> SinkResult<Option<TableState>> {
        let inner = self.inner.lock().await;
        Ok(inner.tables.get(table).map(|table| table.state.clone()))
    }

    async fn create_schema(&self, schema: &str) -> SinkResult<()> {
        let mut inner = self.inner.lock().await;
        inner.next_ddl_failure()?;
        inner.schemas.insert(schema.to_string());

        Ok(())
    }

    async fn create_table(
        &self,
        table: &TableName,
        columns: &[ColumnDef],
        primary_key: &[String],
    ) -> SinkResult<()> {
        let mut inner = self.inner.lock().await;
        inner.next_ddl_failure()?;

        if !inner.schemas.contains(&table.schema) {
            return Err(sink_error!(
                ErrorKind::DestinationFatal,
                "Schema does not exist",
                table.schema
            ));
        }

        info!(%table, columns = columns.len(), "creating table");
        inner.tables.entry(table.clone()).or_insert(MemoryTable {
            state: TableState {
                name: table.clone(),
                columns: columns.to_vec(),
                primary_key: primary_key.to_vec(),
            },
            rows: Vec::new(),
        });

        Ok(())
    }

    async fn add_column(&self, table: &TableName, column: &ColumnDef) -> SinkResult<()> {
        let mut inner = self.inner.lock().await;
        inner.next_ddl_failure()?;

        let table = inner.table_mut(table)?;
        table.state.add_column(column.clone());

        Ok(())
    }

    async fn alter_column_type(
        &self,
        table: &TableName,
        column: &str,
        typ: ColumnType,
    ) -> SinkResult<()> {
        let mut inner = self.inner.lock().await;
        inner.next_ddl_failure()?;

        let table = inner.table_mut(table)?;
        let Some(current) = table.state.column(column).map(|column| column.typ) else {
            return Err(sink_error!(
                ErrorKind::DestinationFatal,
                "Column does not exist",
                column
            ));
        };
        if self.disallowed_widenings.contains(&(current, typ)) {
            return Err(sink_error!(
                ErrorKind::DestinationFatal,
                "Column type change is not supported",
                format!("{column}: {current} -> {typ}")
            ));
        }

        table.state.widen_column(column, typ);
        for row in &mut table.rows {
            if let Some(cell) = row.remove(column) {
                row.insert(column.to_string(), cell.coerce(typ));
            }
        }

        Ok(())
    }

    async fn create_index(&self, table: &TableName, column: &str) -> SinkResult<()> {
        let mut inner = self.inner.lock().await;
        inner.next_ddl_failure()?;

        let index = (table.clone(), column.to_string());
        if !inner.indices.contains(&index) {
            inner.indices.push(index);
        }

        Ok(())
    }

    async fn grant_select(&self, table: &TableName, role: &str) -> SinkResult<()> {
        let mut inner = self.inner.lock().await;
        inner.next_ddl_failure()?;

        let grant = (table.clone(), role.to_string());
        if !inner.grants.contains(&grant) {
            inner.grants.push(grant);
        }

        Ok(())
    }

    async fn write(&self, plan: &WritePlan) -> SinkResult<u64> {
        let delay = self.inner.lock().await.write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().await;
        if !inner.failing_writes.is_empty() {
            let kind = inner.failing_writes.remove(0);
            return Err(sink_error!(kind, "Injected write failure", plan.table));
        }

        let table = inner.table_mut(&plan.table)?;
        if let Some(missing) = plan
            .columns
            .iter()
            .find(|column| table.state.column(&column.name).is_none())
        {
            return Err(sink_error!(
                ErrorKind::DestinationFatal,
                "Column does not exist",
                missing.name
            ));
        }

        let mut rows = table.rows.clone();
        let affected = apply_plan(&mut rows, plan);
        table.rows = rows;
        inner.committed_writes += 1;

        debug!(table = %plan.table, affected, "applied write plan");

        Ok(affected)
    }

    fn supports_widening(&self, from: ColumnType, to: ColumnType) -> bool {
        !self.disallowed_widenings.contains(&(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableName {
        TableName::new("raw", "users")
    }

    fn columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id", ColumnType::Integer, false),
            ColumnDef::new("name", ColumnType::Text, true),
        ]
    }

    fn merge(upserts: Vec<Vec<Cell>>, deletes: Vec<Vec<Cell>>) -> WritePlan {
        WritePlan {
            table: users(),
            columns: columns(),
            key_columns: vec!["id".to_string()],
            kind: PlanKind::Merge { upserts, deletes },
        }
    }

    async fn destination() -> MemoryDestination {
        let destination = MemoryDestination::new();
        destination.create_schema("raw").await.unwrap();
        destination
            .create_table(&users(), &columns(), &["id".to_string()])
            .await
            .unwrap();
        destination
    }

    #[tokio::test]
    async fn merge_is_idempotent() {
        let destination = destination().await;
        let plan = merge(
            vec![
                vec![Cell::Integer(1), Cell::String("a".to_string())],
                vec![Cell::Integer(2), Cell::String("b".to_string())],
            ],
            vec![],
        );

        destination.write(&plan).await.unwrap();
        let once = destination.rows(&users()).await;
        destination.write(&plan).await.unwrap();

        assert_eq!(destination.rows(&users()).await, once);
        assert_eq!(once.len(), 2);
    }

    #[tokio::test]
    async fn failed_write_leaves_table_untouched() {
        let destination = destination().await;
        destination
            .fail_next_writes(vec![ErrorKind::DestinationTransient])
            .await;

        let plan = merge(
            vec![vec![Cell::Integer(1), Cell::String("a".to_string())]],
            vec![],
        );
        let err = destination.write(&plan).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DestinationTransient);
        assert!(destination.rows(&users()).await.is_empty());
        assert_eq!(destination.committed_writes().await, 0);

        destination.write(&plan).await.unwrap();
        assert_eq!(destination.rows(&users()).await.len(), 1);
    }

    #[tokio::test]
    async fn deletes_by_key() {
        let destination = destination().await;
        destination
            .write(&merge(
                vec![
                    vec![Cell::Integer(1), Cell::String("a".to_string())],
                    vec![Cell::Integer(2), Cell::String("b".to_string())],
                ],
                vec![],
            ))
            .await
            .unwrap();

        let affected = destination
            .write(&merge(vec![], vec![vec![Cell::Integer(1)]]))
            .await
            .unwrap();

        assert_eq!(affected, 1);
        let rows = destination.rows(&users()).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&Cell::Integer(2)));
    }

    #[tokio::test]
    async fn widening_converts_stored_values() {
        let destination = destination().await;
        destination
            .write(&merge(
                vec![vec![Cell::Integer(1), Cell::String("a".to_string())]],
                vec![],
            ))
            .await
            .unwrap();

        destination
            .alter_column_type(&users(), "id", ColumnType::Number)
            .await
            .unwrap();

        let rows = destination.rows(&users()).await;
        assert_eq!(
            rows[0].get("id"),
            Some(&Cell::Number(bigdecimal::BigDecimal::from(1)))
        );
        assert_eq!(
            destination
                .table_state(&users())
                .await
                .unwrap()
                .column("id")
                .unwrap()
                .typ,
            ColumnType::Number
        );
    }
}
