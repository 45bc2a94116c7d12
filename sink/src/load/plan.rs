use std::collections::HashMap;

use crate::batch::Batch;
use crate::schema::StreamSchema;
use crate::types::{Cell, ColumnDef, TableName, TableState};

/// Rows to write, in the order of [`WritePlan::columns`].
pub type Row = Vec<Cell>;

/// What a [`WritePlan`] does to the table.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanKind {
    /// Plain insert of every row.
    Append { rows: Vec<Row> },
    /// Insert-or-update of `upserts` and delete of `deletes` by key.
    ///
    /// Keys are unique across both lists. Delete rows hold the key values only, in the
    /// order of [`WritePlan::key_columns`].
    Merge { upserts: Vec<Row>, deletes: Vec<Row> },
}

/// A set of writes to a single table, executed as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct WritePlan {
    pub table: TableName,
    pub columns: Vec<ColumnDef>,
    pub key_columns: Vec<String>,
    pub kind: PlanKind,
}

enum Write {
    Upsert(Row),
    Delete(Row),
}

impl WritePlan {
    /// Builds the plan loading `batch` into `table`.
    ///
    /// The plan writes the table columns declared by `schema`, with cells converted to the
    /// table's column types. With key properties, records are deduplicated by key and the
    /// last record wins; with `hard_delete`, a record whose deletion marker is set deletes
    /// its key instead of being upserted. Without key properties every record is appended.
    pub fn build(
        batch: &Batch,
        table: &TableState,
        schema: &StreamSchema,
        hard_delete: bool,
    ) -> WritePlan {
        let columns: Vec<ColumnDef> = table
            .columns
            .iter()
            .filter(|column| schema.column(&column.name).is_some())
            .cloned()
            .collect();

        let row_of = |record: &crate::types::Record| -> Row {
            columns
                .iter()
                .map(|column| record.cell(&column.name).clone().coerce(column.typ))
                .collect()
        };

        if !schema.has_keys() {
            let rows = batch.records.iter().map(&row_of).collect();

            return WritePlan {
                table: table.name.clone(),
                columns,
                key_columns: vec![],
                kind: PlanKind::Append { rows },
            };
        }

        let key_types: Vec<_> = schema
            .key_properties
            .iter()
            .map(|key| {
                columns
                    .iter()
                    .find(|column| &column.name == key)
                    .map(|column| column.typ)
            })
            .collect();

        let mut positions: HashMap<Vec<String>, usize> = HashMap::with_capacity(batch.len());
        let mut writes: Vec<Option<Write>> = Vec::with_capacity(batch.len());
        for record in &batch.records {
            let key_cells: Row = schema
                .key_properties
                .iter()
                .zip(&key_types)
                .map(|(key, typ)| {
                    let cell = record.cell(key).clone();
                    match typ {
                        Some(typ) => cell.coerce(*typ),
                        None => cell,
                    }
                })
                .collect();
            let key: Vec<String> = key_cells.iter().map(Cell::key_fragment).collect();

            let deleted = hard_delete
                && schema
                    .delete_properties
                    .iter()
                    .any(|property| !record.cell(property).is_null());
            let write = if deleted {
                Write::Delete(key_cells)
            } else {
                Write::Upsert(row_of(record))
            };

            if let Some(previous) = positions.insert(key, writes.len()) {
                writes[previous] = None;
            }
            writes.push(Some(write));
        }

        let mut upserts = Vec::new();
        let mut deletes = Vec::new();
        for write in writes.into_iter().flatten() {
            match write {
                Write::Upsert(row) => upserts.push(row),
                Write::Delete(key) => deletes.push(key),
            }
        }

        WritePlan {
            table: table.name.clone(),
            columns,
            key_columns: schema.key_properties.clone(),
            kind: PlanKind::Merge { upserts, deletes },
        }
    }

    /// Returns the number of rows the plan touches.
    pub fn row_count(&self) -> usize {
        match &self.kind {
            PlanKind::Append { rows } => rows.len(),
            PlanKind::Merge { upserts, deletes } => upserts.len() + deletes.len(),
        }
    }

    pub fn is_append(&self) -> bool {
        matches!(self.kind, PlanKind::Append { .. })
    }

    /// Returns the position of `column` in the plan's rows.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AbstractType, ColumnSchema, DELETED_AT_COLUMN};
    use crate::types::{ColumnType, Record, StreamId};
    use std::collections::BTreeMap;

    fn schema(keys: &[&str], delete: bool) -> StreamSchema {
        let mut columns = vec![
            ColumnSchema::new("id", vec![AbstractType::Integer], false),
            ColumnSchema::new("name", vec![AbstractType::String], true),
        ];
        let mut delete_properties = vec![];
        if delete {
            columns.push(ColumnSchema::new(
                DELETED_AT_COLUMN,
                vec![AbstractType::String],
                true,
            ));
            delete_properties.push(DELETED_AT_COLUMN.to_string());
        }

        StreamSchema {
            stream: StreamId::from("users"),
            version: 1,
            columns,
            key_properties: keys.iter().map(|k| k.to_string()).collect(),
            delete_properties,
        }
    }

    fn table() -> TableState {
        TableState {
            name: TableName::new("raw", "users"),
            columns: vec![
                ColumnDef::new("id", ColumnType::Integer, false),
                ColumnDef::new("name", ColumnType::Text, true),
                ColumnDef::new(DELETED_AT_COLUMN, ColumnType::Text, true),
                ColumnDef::new("legacy", ColumnType::Text, true),
            ],
            primary_key: vec!["id".to_string()],
        }
    }

    fn record(sequence: u64, id: i64, name: &str, deleted: Option<&str>) -> Record {
        let mut cells = BTreeMap::from([
            ("id".to_string(), Cell::Integer(id)),
            ("name".to_string(), Cell::String(name.to_string())),
        ]);
        if let Some(deleted) = deleted {
            cells.insert(
                DELETED_AT_COLUMN.to_string(),
                Cell::String(deleted.to_string()),
            );
        }

        Record {
            stream: StreamId::from("users"),
            schema_version: 1,
            sequence,
            cells,
        }
    }

    fn batch(records: Vec<Record>) -> Batch {
        Batch {
            stream: StreamId::from("users"),
            schema_version: 1,
            first_sequence: records.first().unwrap().sequence,
            last_sequence: records.last().unwrap().sequence,
            records,
        }
    }

    #[test]
    fn last_write_wins_per_key() {
        let batch = batch(vec![
            record(1, 1, "first", None),
            record(2, 2, "other", None),
            record(3, 1, "second", None),
        ]);

        let plan = WritePlan::build(&batch, &table(), &schema(&["id"], false), false);

        let names: Vec<_> = plan.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name"]);
        assert_eq!(plan.key_columns, vec!["id".to_string()]);
        assert_eq!(
            plan.kind,
            PlanKind::Merge {
                upserts: vec![
                    vec![Cell::Integer(2), Cell::String("other".to_string())],
                    vec![Cell::Integer(1), Cell::String("second".to_string())],
                ],
                deletes: vec![],
            }
        );
    }

    #[test]
    fn composite_keys_sharing_their_text_stay_distinct() {
        let schema = StreamSchema {
            stream: StreamId::from("pairs"),
            version: 1,
            columns: vec![
                ColumnSchema::new("a", vec![AbstractType::String], false),
                ColumnSchema::new("b", vec![AbstractType::String], false),
            ],
            key_properties: vec!["a".to_string(), "b".to_string()],
            delete_properties: vec![],
        };
        let table = TableState {
            name: TableName::new("raw", "pairs"),
            columns: vec![
                ColumnDef::new("a", ColumnType::Text, false),
                ColumnDef::new("b", ColumnType::Text, false),
            ],
            primary_key: vec!["a".to_string(), "b".to_string()],
        };
        let pair = |sequence: u64, a: &str, b: &str| Record {
            stream: StreamId::from("pairs"),
            schema_version: 1,
            sequence,
            cells: BTreeMap::from([
                ("a".to_string(), Cell::String(a.to_string())),
                ("b".to_string(), Cell::String(b.to_string())),
            ]),
        };
        let batch = Batch {
            stream: StreamId::from("pairs"),
            schema_version: 1,
            first_sequence: 1,
            last_sequence: 2,
            records: vec![pair(1, "x\u{1}", "y"), pair(2, "x", "\u{1}y")],
        };

        let plan = WritePlan::build(&batch, &table, &schema, false);

        assert_eq!(plan.row_count(), 2);
    }

    #[test]
    fn hard_delete_turns_marked_records_into_deletes() {
        let batch = batch(vec![
            record(1, 1, "kept", None),
            record(2, 2, "gone", Some("2019-02-01T00:00:00Z")),
        ]);

        let plan = WritePlan::build(&batch, &table(), &schema(&["id"], true), true);
        let PlanKind::Merge { upserts, deletes } = &plan.kind else {
            panic!("expected a merge plan");
        };
        assert_eq!(upserts.len(), 1);
        assert_eq!(deletes, &vec![vec![Cell::Integer(2)]]);
    }

    #[test]
    fn soft_delete_keeps_marker_as_column() {
        let batch = batch(vec![record(1, 2, "gone", Some("2019-02-01T00:00:00Z"))]);

        let plan = WritePlan::build(&batch, &table(), &schema(&["id"], true), false);
        let PlanKind::Merge { upserts, deletes } = &plan.kind else {
            panic!("expected a merge plan");
        };
        assert!(deletes.is_empty());
        let marker = plan.column_index(DELETED_AT_COLUMN).unwrap();
        assert_eq!(
            upserts[0][marker],
            Cell::String("2019-02-01T00:00:00Z".to_string())
        );
    }

    #[test]
    fn no_keys_appends_every_record() {
        let batch = batch(vec![record(1, 1, "a", None), record(2, 1, "a", None)]);

        let plan = WritePlan::build(&batch, &table(), &schema(&[], false), false);
        assert!(plan.is_append());
        assert_eq!(plan.row_count(), 2);
    }
}
