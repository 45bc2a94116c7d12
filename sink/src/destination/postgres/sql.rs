use pg_escape::quote_identifier;

use crate::destination::postgres::types::pg_type_name;
use crate::types::{ColumnDef, ColumnType, TableName};

/// Longest identifier PostgreSQL keeps without truncation.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Returns the quoted, schema-qualified name of `table`.
pub fn qualified(table: &TableName) -> String {
    format!(
        "{}.{}",
        quote_identifier(&table.schema),
        quote_identifier(&table.name)
    )
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|column| quote_identifier(column).to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_definition(column: &ColumnDef) -> String {
    let mut definition = format!(
        "{} {}",
        quote_identifier(&column.name),
        pg_type_name(column.typ)
    );
    if !column.nullable {
        definition.push_str(" not null");
    }

    definition
}

pub fn create_schema(schema: &str) -> String {
    format!("create schema if not exists {}", quote_identifier(schema))
}

pub fn create_table(table: &TableName, columns: &[ColumnDef], primary_key: &[String]) -> String {
    let mut definitions: Vec<String> = columns.iter().map(column_definition).collect();
    if !primary_key.is_empty() {
        definitions.push(format!("primary key ({})", column_list(primary_key)));
    }

    format!(
        "create table if not exists {} ({})",
        qualified(table),
        definitions.join(", ")
    )
}

pub fn add_column(table: &TableName, column: &ColumnDef) -> String {
    format!(
        "alter table {} add column if not exists {}",
        qualified(table),
        column_definition(column)
    )
}

pub fn alter_column_type(table: &TableName, column: &str, typ: ColumnType) -> String {
    let column = quote_identifier(column);
    let typ = pg_type_name(typ);

    format!(
        "alter table {} alter column {column} type {typ} using {column}::{typ}",
        qualified(table)
    )
}

/// Returns the name of the single column index of `column`, within the identifier limit.
pub fn index_name(table: &TableName, column: &str) -> String {
    let mut name = format!("i_{}_{}", table.name, column);
    if name.len() > MAX_IDENTIFIER_LEN {
        let mut end = MAX_IDENTIFIER_LEN;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }

    name
}

pub fn create_index(table: &TableName, column: &str) -> String {
    format!(
        "create index if not exists {} on {} ({})",
        quote_identifier(&index_name(table, column)),
        qualified(table),
        quote_identifier(column)
    )
}

pub fn grant_select(table: &TableName, role: &str) -> String {
    let role = quote_identifier(role);

    format!(
        "grant usage on schema {} to {role}; grant select on {} to {role}",
        quote_identifier(&table.schema),
        qualified(table)
    )
}

pub fn describe_columns() -> &'static str {
    "select column_name::text, data_type::text, is_nullable::text \
     from information_schema.columns \
     where table_schema = $1 and table_name = $2 \
     order by ordinal_position"
}

pub fn describe_primary_key() -> &'static str {
    "select kcu.column_name::text \
     from information_schema.table_constraints tc \
     join information_schema.key_column_usage kcu \
       on tc.constraint_name = kcu.constraint_name \
      and tc.table_schema = kcu.table_schema \
      and tc.table_name = kcu.table_name \
     where tc.constraint_type = 'PRIMARY KEY' \
       and tc.table_schema = $1 and tc.table_name = $2 \
     order by kcu.ordinal_position"
}

pub fn create_staging_table(staging: &str, columns: &[ColumnDef]) -> String {
    let definitions = columns
        .iter()
        .map(|column| {
            format!(
                "{} {}",
                quote_identifier(&column.name),
                pg_type_name(column.typ)
            )
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "create temporary table {} ({definitions}) on commit drop",
        quote_identifier(staging)
    )
}

pub fn copy_into(staging: &str, columns: &[String]) -> String {
    format!(
        "copy {} ({}) from stdin with (format text)",
        quote_identifier(staging),
        column_list(columns)
    )
}

fn key_join(left: &str, right: &str, keys: &[String]) -> String {
    keys.iter()
        .map(|key| {
            let key = quote_identifier(key);
            format!("{left}.{key} = {right}.{key}")
        })
        .collect::<Vec<_>>()
        .join(" and ")
}

/// Deletes the target rows whose key is listed in `staging`.
pub fn delete_by_key(table: &TableName, staging: &str, keys: &[String]) -> String {
    format!(
        "delete from {} t using {} s where {}",
        qualified(table),
        quote_identifier(staging),
        key_join("t", "s", keys)
    )
}

/// Updates the target rows matching a staged key. Returns [`None`] when every column is a
/// key column, leaving nothing to update.
pub fn update_from_staging(
    table: &TableName,
    staging: &str,
    columns: &[String],
    keys: &[String],
) -> Option<String> {
    let assignments = columns
        .iter()
        .filter(|column| !keys.contains(column))
        .map(|column| {
            let column = quote_identifier(column);
            format!("{column} = s.{column}")
        })
        .collect::<Vec<_>>();
    if assignments.is_empty() {
        return None;
    }

    Some(format!(
        "update {} t set {} from {} s where {}",
        qualified(table),
        assignments.join(", "),
        quote_identifier(staging),
        key_join("t", "s", keys)
    ))
}

/// Inserts the staged rows whose key is not in the target yet.
pub fn insert_missing_from_staging(
    table: &TableName,
    staging: &str,
    columns: &[String],
    keys: &[String],
) -> String {
    let selected = columns
        .iter()
        .map(|column| format!("s.{}", quote_identifier(column)))
        .collect::<Vec<_>>()
        .join(", ");
    let first_key = keys
        .first()
        .map(|key| quote_identifier(key).to_string())
        .unwrap_or_default();

    format!(
        "insert into {} ({}) select {selected} from {} s left join {} t on {} where t.{first_key} is null",
        qualified(table),
        column_list(columns),
        quote_identifier(staging),
        qualified(table),
        key_join("t", "s", keys)
    )
}

pub fn insert_from_staging(table: &TableName, staging: &str, columns: &[String]) -> String {
    let columns = column_list(columns);

    format!(
        "insert into {} ({columns}) select {columns} from {}",
        qualified(table),
        quote_identifier(staging)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableName {
        TableName::new("crm", "Users")
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn create_table_quotes_and_adds_primary_key() {
        let sql = create_table(
            &users(),
            &[
                ColumnDef::new("id", ColumnType::Integer, false),
                ColumnDef::new("payload", ColumnType::Json, true),
            ],
            &strings(&["id"]),
        );

        assert_eq!(
            sql,
            r#"create table if not exists crm."Users" (id bigint not null, payload jsonb, primary key (id))"#
        );
    }

    #[test]
    fn alter_casts_existing_values() {
        assert_eq!(
            alter_column_type(&users(), "score", ColumnType::Number),
            r#"alter table crm."Users" alter column score type numeric using score::numeric"#
        );
    }

    #[test]
    fn merge_statements_join_on_every_key() {
        let columns = strings(&["id", "region", "nickname"]);
        let keys = strings(&["id", "region"]);

        assert_eq!(
            update_from_staging(&users(), "stage", &columns, &keys).unwrap(),
            r#"update crm."Users" t set nickname = s.nickname from stage s where t.id = s.id and t.region = s.region"#
        );
        assert_eq!(
            insert_missing_from_staging(&users(), "stage", &columns, &keys),
            r#"insert into crm."Users" (id, region, nickname) select s.id, s.region, s.nickname from stage s left join crm."Users" t on t.id = s.id and t.region = s.region where t.id is null"#
        );
        assert!(update_from_staging(&users(), "stage", &keys, &keys).is_none());
    }

    #[test]
    fn index_names_are_truncated() {
        let column = "c".repeat(80);
        assert_eq!(index_name(&users(), &column).len(), MAX_IDENTIFIER_LEN);
    }
}
