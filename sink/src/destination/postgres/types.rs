use crate::types::ColumnType;

/// Returns the PostgreSQL type of a column of type `typ`.
///
/// Columns of a type the sink does not model are staged as text.
pub fn pg_type_name(typ: ColumnType) -> &'static str {
    match typ {
        ColumnType::Boolean => "boolean",
        ColumnType::Integer => "bigint",
        ColumnType::Number => "numeric",
        ColumnType::Time => "time without time zone",
        ColumnType::Timestamp => "timestamp without time zone",
        ColumnType::Json => "jsonb",
        ColumnType::Text | ColumnType::Other => "text",
    }
}

/// Maps a `data_type` of `information_schema.columns` to a [`ColumnType`].
pub fn column_type_from_pg(data_type: &str) -> ColumnType {
    match data_type.to_lowercase().as_str() {
        "boolean" => ColumnType::Boolean,
        "smallint" | "integer" | "bigint" => ColumnType::Integer,
        "numeric" | "real" | "double precision" => ColumnType::Number,
        "time without time zone" => ColumnType::Time,
        "timestamp without time zone" | "timestamp with time zone" => ColumnType::Timestamp,
        "json" | "jsonb" => ColumnType::Json,
        "text" | "character varying" | "character" => ColumnType::Text,
        _ => ColumnType::Other,
    }
}
