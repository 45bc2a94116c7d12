use std::sync::Arc;

use sink_config::shared::PgConnectionConfig;
use tokio_postgres::Client;
use tracing::{debug, info};
use uuid::Uuid;

use crate::bail;
use crate::destination::postgres::client::PgClientPool;
use crate::destination::postgres::copy::copy_rows;
use crate::destination::postgres::sql;
use crate::destination::postgres::types::column_type_from_pg;
use crate::destination::Destination;
use crate::error::{ErrorKind, SinkResult};
use crate::load::{PlanKind, WritePlan};
use crate::types::{ColumnDef, ColumnType, TableName, TableState};

/// Destination writing into a PostgreSQL database.
#[derive(Debug, Clone)]
pub struct PostgresDestination {
    pool: Arc<PgClientPool>,
}

impl PostgresDestination {
    /// Connects to the database described by `config`.
    ///
    /// A first connection is opened right away so that unreachable databases and invalid
    /// credentials are reported before any input is read.
    pub async fn connect(config: PgConnectionConfig) -> SinkResult<Self> {
        let pool = PgClientPool::new(config);
        let client = pool.acquire().await?;
        pool.release(client).await;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    async fn execute_ddl(&self, statement: &str) -> SinkResult<()> {
        debug!(statement, "executing ddl statement");

        let client = self.pool.acquire().await?;
        let result = client.batch_execute(statement).await;
        self.pool.release(client).await;
        result?;

        Ok(())
    }
}

async fn describe(client: &Client, table: &TableName) -> SinkResult<Option<TableState>> {
    let rows = client
        .query(sql::describe_columns(), &[&table.schema, &table.name])
        .await?;
    if rows.is_empty() {
        return Ok(None);
    }

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        let name: String = row.try_get(0)?;
        let data_type: String = row.try_get(1)?;
        let is_nullable: String = row.try_get(2)?;

        columns.push(ColumnDef::new(
            name,
            column_type_from_pg(&data_type),
            is_nullable == "YES",
        ));
    }

    let mut primary_key = Vec::new();
    for row in client
        .query(sql::describe_primary_key(), &[&table.schema, &table.name])
        .await?
    {
        primary_key.push(row.try_get::<_, String>(0)?);
    }

    Ok(Some(TableState {
        name: table.clone(),
        columns,
        primary_key,
    }))
}

async fn write_plan(client: &mut Client, plan: &WritePlan) -> SinkResult<u64> {
    let columns: Vec<String> = plan
        .columns
        .iter()
        .map(|column| column.name.clone())
        .collect();
    let staging = format!("sink_staging_{}", Uuid::new_v4().simple());

    let transaction = client.transaction().await?;
    transaction
        .batch_execute(&sql::create_staging_table(&staging, &plan.columns))
        .await?;

    let mut affected = 0;
    match &plan.kind {
        PlanKind::Append { rows } => {
            copy_rows(&transaction, &staging, &columns, rows).await?;

            let insert = sql::insert_from_staging(&plan.table, &staging, &columns);
            affected += transaction.execute(insert.as_str(), &[]).await?;
        }
        PlanKind::Merge { upserts, deletes } => {
            if !deletes.is_empty() {
                let key_columns: Vec<ColumnDef> = plan
                    .key_columns
                    .iter()
                    .filter_map(|key| plan.columns.iter().find(|column| &column.name == key))
                    .cloned()
                    .collect();
                if key_columns.len() != plan.key_columns.len() {
                    bail!(
                        ErrorKind::InvalidState,
                        "Write plan does not carry every key column",
                        plan.table
                    );
                }

                let deleted = format!("{staging}_deleted");
                transaction
                    .batch_execute(&sql::create_staging_table(&deleted, &key_columns))
                    .await?;
                copy_rows(&transaction, &deleted, &plan.key_columns, deletes).await?;

                let delete = sql::delete_by_key(&plan.table, &deleted, &plan.key_columns);
                affected += transaction.execute(delete.as_str(), &[]).await?;
            }

            if !upserts.is_empty() {
                copy_rows(&transaction, &staging, &columns, upserts).await?;

                if let Some(update) =
                    sql::update_from_staging(&plan.table, &staging, &columns, &plan.key_columns)
                {
                    affected += transaction.execute(update.as_str(), &[]).await?;
                }

                let insert = sql::insert_missing_from_staging(
                    &plan.table,
                    &staging,
                    &columns,
                    &plan.key_columns,
                );
                affected += transaction.execute(insert.as_str(), &[]).await?;
            }
        }
    }

    transaction.commit().await?;

    Ok(affected)
}

impl Destination for PostgresDestination {
    async fn describe_table(&self, table: &TableName) -> SinkResult<Option<TableState>> {
        let client = self.pool.acquire().await?;
        let result = describe(&client, table).await;
        self.pool.release(client).await;

        result
    }

    async fn create_schema(&self, schema: &str) -> SinkResult<()> {
        self.execute_ddl(&sql::create_schema(schema)).await
    }

    async fn create_table(
        &self,
        table: &TableName,
        columns: &[ColumnDef],
        primary_key: &[String],
    ) -> SinkResult<()> {
        info!(%table, columns = columns.len(), "creating table");
        self.execute_ddl(&sql::create_table(table, columns, primary_key))
            .await
    }

    async fn add_column(&self, table: &TableName, column: &ColumnDef) -> SinkResult<()> {
        info!(%table, column = column.name, typ = %column.typ, "adding column");
        self.execute_ddl(&sql::add_column(table, column)).await
    }

    async fn alter_column_type(
        &self,
        table: &TableName,
        column: &str,
        typ: ColumnType,
    ) -> SinkResult<()> {
        info!(%table, column, %typ, "changing column type");
        self.execute_ddl(&sql::alter_column_type(table, column, typ))
            .await
    }

    async fn create_index(&self, table: &TableName, column: &str) -> SinkResult<()> {
        self.execute_ddl(&sql::create_index(table, column)).await
    }

    async fn grant_select(&self, table: &TableName, role: &str) -> SinkResult<()> {
        self.execute_ddl(&sql::grant_select(table, role)).await
    }

    async fn write(&self, plan: &WritePlan) -> SinkResult<u64> {
        let mut client = self.pool.acquire().await?;
        let result = write_plan(&mut client, plan).await;
        self.pool.release(client).await;

        result
    }

    fn supports_widening(&self, from: ColumnType, to: ColumnType) -> bool {
        from != ColumnType::Other && to != ColumnType::Other
    }
}
