use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveTime, Utc};
use serde_json::{Map, Value};

use crate::types::ColumnType;

/// Format used when rendering times as text.
pub const TIME_FORMAT: &str = "%H:%M:%S%.f";

/// Format used when rendering timestamps as text, always in UTC.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A single validated value of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Integer(i64),
    Number(BigDecimal),
    String(String),
    Time(NaiveTime),
    Timestamp(DateTime<Utc>),
    Object(Map<String, Value>),
    Array(Vec<Value>),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Renders the value as it is written into a text column.
    ///
    /// Returns [`None`] for [`Cell::Null`].
    pub fn to_text(&self) -> Option<String> {
        let text = match self {
            Cell::Null => return None,
            Cell::Bool(value) => value.to_string(),
            Cell::Integer(value) => value.to_string(),
            Cell::Number(value) => value.to_string(),
            Cell::String(value) => value.clone(),
            Cell::Time(value) => value.format(TIME_FORMAT).to_string(),
            Cell::Timestamp(value) => value.naive_utc().format(TIMESTAMP_FORMAT).to_string(),
            Cell::Object(value) => Value::Object(value.clone()).to_string(),
            Cell::Array(value) => Value::Array(value.clone()).to_string(),
        };

        Some(text)
    }

    /// Converts the value into the representation a column of type `typ` stores.
    ///
    /// Only conversions that a widening produces are applied: integers stored in a number
    /// column become numbers, and everything stored in a text column becomes a string.
    pub fn coerce(self, typ: ColumnType) -> Cell {
        match (self, typ) {
            (Cell::Null, _) => Cell::Null,
            (Cell::Integer(value), ColumnType::Number) => Cell::Number(BigDecimal::from(value)),
            (cell @ Cell::String(_), ColumnType::Text) => cell,
            (cell, ColumnType::Text) => match cell.to_text() {
                Some(text) => Cell::String(text),
                None => Cell::Null,
            },
            (cell, _) => cell,
        }
    }

    /// Returns a canonical string identifying the value inside a composite key.
    pub fn key_fragment(&self) -> String {
        if let Cell::Number(value) = self {
            return value.normalized().to_string();
        }

        match self.to_text() {
            Some(text) => text,
            None => "\u{0}".to_string(),
        }
    }
}

impl From<&Cell> for Value {
    fn from(cell: &Cell) -> Self {
        match cell {
            Cell::Null => Value::Null,
            Cell::Bool(value) => Value::Bool(*value),
            Cell::Integer(value) => Value::from(*value),
            Cell::Number(value) => Value::String(value.to_string()),
            Cell::String(value) => Value::String(value.clone()),
            Cell::Time(value) => Value::String(value.format(TIME_FORMAT).to_string()),
            Cell::Timestamp(value) => Value::String(value.to_rfc3339()),
            Cell::Object(value) => Value::Object(value.clone()),
            Cell::Array(value) => Value::Array(value.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    #[test]
    fn text_rendering() {
        let timestamp = Utc.with_ymd_and_hms(2019, 2, 1, 15, 12, 45).unwrap();
        assert_eq!(
            Cell::Timestamp(timestamp).to_text().as_deref(),
            Some("2019-02-01 15:12:45")
        );
        assert_eq!(
            Cell::Number(BigDecimal::from_str("1.50").unwrap())
                .to_text()
                .as_deref(),
            Some("1.50")
        );
        assert_eq!(Cell::Null.to_text(), None);
        assert_eq!(
            Cell::Array(vec![Value::from(1), Value::from(2)])
                .to_text()
                .as_deref(),
            Some("[1,2]")
        );
    }

    #[test]
    fn coercion_follows_widening() {
        assert_eq!(
            Cell::Integer(3).coerce(ColumnType::Number),
            Cell::Number(BigDecimal::from(3))
        );
        assert_eq!(
            Cell::Integer(3).coerce(ColumnType::Text),
            Cell::String("3".to_string())
        );
        assert_eq!(Cell::Null.coerce(ColumnType::Text), Cell::Null);
        assert_eq!(Cell::Bool(true).coerce(ColumnType::Boolean), Cell::Bool(true));
    }
}
