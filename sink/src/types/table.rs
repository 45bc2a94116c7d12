use std::fmt;

use crate::types::ColumnType;

/// Schema-qualified name of a destination table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableName {
    pub schema: String,
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> TableName {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// A column of a destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub typ: ColumnType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, typ: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            typ,
            nullable,
        }
    }
}

/// Destination side mirror of a table.
///
/// Columns are only ever added and their types only ever widened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableState {
    pub name: TableName,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
}

impl TableState {
    pub fn new(name: TableName) -> Self {
        Self {
            name,
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    /// Records an added column; an existing column of the same name is left untouched.
    pub fn add_column(&mut self, column: ColumnDef) {
        if self.column(&column.name).is_none() {
            self.columns.push(column);
        }
    }

    /// Records a column type change if `typ` is wider than the recorded type.
    pub fn widen_column(&mut self, name: &str, typ: ColumnType) {
        if let Some(column) = self.columns.iter_mut().find(|column| column.name == name) {
            if typ.is_wider_than(column.typ) {
                column.typ = typ;
            }
        }
    }
}
