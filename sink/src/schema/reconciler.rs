use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::{debug, info};

use crate::destination::Destination;
use crate::error::{ErrorKind, SinkResult};
use crate::schema::{StreamSchema, TableNaming, TableTarget, TypeMapper};
use crate::sink_error;
use crate::types::{ColumnDef, ColumnType, StreamId, TableName, TableState};

/// A single DDL operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdlOp {
    CreateSchema {
        schema: String,
    },
    CreateTable {
        table: TableName,
        columns: Vec<ColumnDef>,
        primary_key: Vec<String>,
    },
    AddColumn {
        table: TableName,
        column: ColumnDef,
    },
    AlterColumnType {
        table: TableName,
        column: String,
        from: ColumnType,
        to: ColumnType,
    },
    CreateIndex {
        table: TableName,
        column: String,
    },
    GrantSelect {
        table: TableName,
        role: String,
    },
}

impl fmt::Display for DdlOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DdlOp::CreateSchema { schema } => write!(f, "create schema {schema}"),
            DdlOp::CreateTable { table, columns, .. } => {
                write!(f, "create table {table} ({} columns)", columns.len())
            }
            DdlOp::AddColumn { table, column } => {
                write!(f, "add column {table}.{} {}", column.name, column.typ)
            }
            DdlOp::AlterColumnType {
                table,
                column,
                from,
                to,
            } => write!(f, "alter column {table}.{column} {from} -> {to}"),
            DdlOp::CreateIndex { table, column } => write!(f, "create index on {table}.{column}"),
            DdlOp::GrantSelect { table, role } => write!(f, "grant select on {table} to {role}"),
        }
    }
}

/// Ordered DDL operations bringing a table in line with a stream schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DdlPlan {
    pub ops: Vec<DdlOp>,
}

impl DdlPlan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[derive(Debug)]
struct ReconciledTable {
    target: TableTarget,
    /// [`None`] while the table does not exist in the destination.
    state: Option<TableState>,
}

/// Keeps destination tables in line with stream schemas.
///
/// Owns the [`TableState`] of every stream; a state is only changed after the destination
/// confirmed the corresponding DDL operation.
#[derive(Debug)]
pub struct TableReconciler {
    mapper: TypeMapper,
    naming: TableNaming,
    tables: HashMap<StreamId, ReconciledTable>,
    created_schemas: HashSet<String>,
}

impl TableReconciler {
    pub fn new(mapper: TypeMapper, naming: TableNaming) -> Self {
        Self {
            mapper,
            naming,
            tables: HashMap::new(),
            created_schemas: HashSet::new(),
        }
    }

    /// Returns the recorded state of the table of `stream`, if the table exists.
    pub fn table(&self, stream: &StreamId) -> Option<&TableState> {
        self.tables
            .get(stream)
            .and_then(|table| table.state.as_ref())
    }

    /// Computes the DDL needed for `schema` without executing it.
    ///
    /// On first sight of a stream, the destination is asked for the current structure of
    /// its table.
    pub async fn plan<D>(&mut self, schema: &StreamSchema, destination: &D) -> SinkResult<DdlPlan>
    where
        D: Destination,
    {
        self.ensure_described(&schema.stream, destination).await?;

        let Some(table) = self.tables.get(&schema.stream) else {
            return Err(sink_error!(
                ErrorKind::InvalidState,
                "Table of stream was not described",
                schema.stream
            ));
        };

        match &table.state {
            None => self.creation_plan(schema, &table.target),
            Some(state) => self.alteration_plan(schema, state, destination),
        }
    }

    /// Plans and executes the DDL needed for `schema`.
    ///
    /// Operations run in order; the recorded table state follows every successful operation
    /// so a failure leaves it describing what the destination actually has.
    pub async fn reconcile<D>(
        &mut self,
        schema: &StreamSchema,
        destination: &D,
    ) -> SinkResult<DdlPlan>
    where
        D: Destination,
    {
        let plan = self.plan(schema, destination).await?;
        if plan.is_empty() {
            debug!(stream = %schema.stream, "table already matches schema");
            return Ok(plan);
        }

        for op in &plan.ops {
            info!(stream = %schema.stream, %op, "executing ddl");
            execute(op, destination).await?;
            self.record(&schema.stream, op);
        }

        Ok(plan)
    }

    async fn ensure_described<D>(&mut self, stream: &StreamId, destination: &D) -> SinkResult<()>
    where
        D: Destination,
    {
        if self.tables.contains_key(stream) {
            return Ok(());
        }

        let target = self.naming.resolve(stream)?;
        let state = destination.describe_table(&target.table).await?;
        if state.is_some() {
            self.created_schemas.insert(target.table.schema.clone());
        }

        debug!(%stream, table = %target.table, exists = state.is_some(), "described table");
        self.tables
            .insert(stream.clone(), ReconciledTable { target, state });

        Ok(())
    }

    fn creation_plan(&self, schema: &StreamSchema, target: &TableTarget) -> SinkResult<DdlPlan> {
        let mut ops = Vec::new();

        if !self.created_schemas.contains(&target.table.schema) {
            ops.push(DdlOp::CreateSchema {
                schema: target.table.schema.clone(),
            });
        }

        let mut columns = Vec::with_capacity(schema.columns.len());
        for column in &schema.columns {
            let typ = self.mapper.resolve(column, None)?;
            columns.push(ColumnDef::new(
                column.name.clone(),
                typ,
                !schema.is_key(&column.name),
            ));
        }

        let indices: Vec<String> = target
            .indices
            .iter()
            .filter(|index| columns.iter().any(|column| &column.name == *index))
            .cloned()
            .collect();

        ops.push(DdlOp::CreateTable {
            table: target.table.clone(),
            columns,
            primary_key: schema.key_properties.clone(),
        });

        for column in indices {
            ops.push(DdlOp::CreateIndex {
                table: target.table.clone(),
                column,
            });
        }

        for role in &target.select_roles {
            ops.push(DdlOp::GrantSelect {
                table: target.table.clone(),
                role: role.clone(),
            });
        }

        Ok(DdlPlan { ops })
    }

    fn alteration_plan<D>(
        &self,
        schema: &StreamSchema,
        state: &TableState,
        destination: &D,
    ) -> SinkResult<DdlPlan>
    where
        D: Destination,
    {
        let mut ops = Vec::new();

        for column in &schema.columns {
            match state.column(&column.name) {
                None => {
                    let typ = self.mapper.resolve(column, None)?;
                    ops.push(DdlOp::AddColumn {
                        table: state.name.clone(),
                        column: ColumnDef::new(column.name.clone(), typ, true),
                    });
                }
                Some(existing) => {
                    let typ = self.mapper.resolve(column, Some(existing.typ))?;
                    if !typ.is_wider_than(existing.typ) {
                        continue;
                    }

                    if !destination.supports_widening(existing.typ, typ) {
                        return Err(sink_error!(
                            ErrorKind::SchemaConflict,
                            "Destination cannot widen column",
                            format!("{}.{}: {} -> {typ}", state.name, column.name, existing.typ)
                        ));
                    }

                    ops.push(DdlOp::AlterColumnType {
                        table: state.name.clone(),
                        column: column.name.clone(),
                        from: existing.typ,
                        to: typ,
                    });
                }
            }
        }

        Ok(DdlPlan { ops })
    }

    fn record(&mut self, stream: &StreamId, op: &DdlOp) {
        if let DdlOp::CreateSchema { schema } = op {
            self.created_schemas.insert(schema.clone());
            return;
        }

        let Some(table) = self.tables.get_mut(stream) else {
            return;
        };

        match op {
            DdlOp::CreateTable {
                table: name,
                columns,
                primary_key,
            } => {
                table.state = Some(TableState {
                    name: name.clone(),
                    columns: columns.clone(),
                    primary_key: primary_key.clone(),
                });
            }
            DdlOp::AddColumn { column, .. } => {
                if let Some(state) = table.state.as_mut() {
                    state.add_column(column.clone());
                }
            }
            DdlOp::AlterColumnType { column, to, .. } => {
                if let Some(state) = table.state.as_mut() {
                    state.widen_column(column, *to);
                }
            }
            DdlOp::CreateSchema { .. } | DdlOp::CreateIndex { .. } | DdlOp::GrantSelect { .. } => {}
        }
    }
}

async fn execute<D>(op: &DdlOp, destination: &D) -> SinkResult<()>
where
    D: Destination,
{
    match op {
        DdlOp::CreateSchema { schema } => destination.create_schema(schema).await,
        DdlOp::CreateTable {
            table,
            columns,
            primary_key,
        } => destination.create_table(table, columns, primary_key).await,
        DdlOp::AddColumn { table, column } => destination.add_column(table, column).await,
        DdlOp::AlterColumnType {
            table, column, to, ..
        } => destination.alter_column_type(table, column, *to).await,
        DdlOp::CreateIndex { table, column } => destination.create_index(table, column).await,
        DdlOp::GrantSelect { table, role } => destination.grant_select(table, role).await,
    }
}
