use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Number, Value};

use crate::bail;
use crate::error::{ErrorKind, SinkResult};
use crate::schema::{AbstractType, ColumnSchema};
use crate::types::Cell;

/// Formats accepted for date-times without an offset, read as UTC.
const NAIVE_DATE_TIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Converts JSON property values into [`Cell`]s according to a column declaration.
pub struct JsonConverter;

impl JsonConverter {
    /// Converts `value` into the cell of `column`.
    ///
    /// The value must match one of the declared types. Integral numbers are accepted for
    /// integer columns even when written with a fraction, like `3.0`. A column without any
    /// declared type accepts every value and keeps it as a string.
    pub fn to_cell(column: &ColumnSchema, value: &Value) -> SinkResult<Cell> {
        if value.is_null() {
            if !column.nullable {
                bail!(
                    ErrorKind::ProtocolError,
                    "Null value for a non-nullable property",
                    column.name
                );
            }

            return Ok(Cell::Null);
        }

        if column.types.is_empty() {
            return Ok(match value {
                Value::String(value) => Cell::String(value.clone()),
                other => Cell::String(other.to_string()),
            });
        }

        let declares = |typ: AbstractType| column.types.contains(&typ);

        let cell = match value {
            Value::Bool(value) if declares(AbstractType::Boolean) => Some(Cell::Bool(*value)),
            Value::Number(number) => Self::number_to_cell(column, number)?,
            Value::String(text) => Self::string_to_cell(column, text),
            Value::Object(object) if declares(AbstractType::Object) => {
                Some(Cell::Object(object.clone()))
            }
            Value::Array(items) if declares(AbstractType::Array) => Some(Cell::Array(items.clone())),
            _ => None,
        };

        match cell {
            Some(cell) => Ok(cell),
            None => bail!(
                ErrorKind::ProtocolError,
                "Value does not match the declared type",
                format!("{}: {}", column.name, excerpt(value))
            ),
        }
    }

    fn number_to_cell(column: &ColumnSchema, number: &Number) -> SinkResult<Option<Cell>> {
        if column.types.contains(&AbstractType::Integer) {
            if let Some(value) = number.as_i64() {
                return Ok(Some(Cell::Integer(value)));
            }

            if let Some(value) = number.as_f64() {
                if value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64 {
                    return Ok(Some(Cell::Integer(value as i64)));
                }
            }
        }

        if column.types.contains(&AbstractType::Number) {
            let value = BigDecimal::from_str(&number.to_string())?;
            return Ok(Some(Cell::Number(value)));
        }

        Ok(None)
    }

    fn string_to_cell(column: &ColumnSchema, text: &str) -> Option<Cell> {
        if column.types.contains(&AbstractType::DateTime) {
            if let Some(value) = parse_date_time(text) {
                return Some(Cell::Timestamp(value));
            }
        }

        if column.types.contains(&AbstractType::Time) {
            if let Ok(value) = NaiveTime::parse_from_str(text, "%H:%M:%S%.f") {
                return Some(Cell::Time(value));
            }
        }

        if column.types.contains(&AbstractType::String) {
            return Some(Cell::String(text.to_string()));
        }

        None
    }
}

/// Parses an RFC 3339 date-time, or a date-time without offset taken as UTC.
pub(crate) fn parse_date_time(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(value) = DateTime::parse_from_rfc3339(text) {
        return Some(value.with_timezone(&Utc));
    }

    NAIVE_DATE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|value| value.and_utc())
}

fn excerpt(value: &Value) -> String {
    let mut text = value.to_string();
    if text.len() > 64 {
        let mut end = 64;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
        text.push_str("...");
    }

    text
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn column(types: Vec<AbstractType>, nullable: bool) -> ColumnSchema {
        ColumnSchema::new("value", types, nullable)
    }

    #[test]
    fn integers_accept_integral_floats() {
        let integer = column(vec![AbstractType::Integer], false);

        assert_eq!(
            JsonConverter::to_cell(&integer, &json!(3)).unwrap(),
            Cell::Integer(3)
        );
        assert_eq!(
            JsonConverter::to_cell(&integer, &json!(3.0)).unwrap(),
            Cell::Integer(3)
        );

        let err = JsonConverter::to_cell(&integer, &json!(3.5)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
    }

    #[test]
    fn integral_floats_beyond_i64_are_not_integers() {
        let integer = column(vec![AbstractType::Integer], false);
        let err = JsonConverter::to_cell(&integer, &json!(9223372036854775808.0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);

        let integer_or_number = column(vec![AbstractType::Integer, AbstractType::Number], false);
        assert!(matches!(
            JsonConverter::to_cell(&integer_or_number, &json!(9223372036854775808.0)).unwrap(),
            Cell::Number(_)
        ));
    }

    #[test]
    fn numbers_keep_their_digits() {
        let number = column(vec![AbstractType::Number], false);

        assert_eq!(
            JsonConverter::to_cell(&number, &json!(1.25)).unwrap(),
            Cell::Number(BigDecimal::from_str("1.25").unwrap())
        );
        assert_eq!(
            JsonConverter::to_cell(&number, &json!(7)).unwrap(),
            Cell::Number(BigDecimal::from(7))
        );
    }

    #[test]
    fn strings_are_parsed_by_format() {
        let date_time = column(vec![AbstractType::DateTime], true);
        assert_eq!(
            JsonConverter::to_cell(&date_time, &json!("2024-03-01T10:00:00+02:00")).unwrap(),
            Cell::Timestamp(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap())
        );
        assert_eq!(
            JsonConverter::to_cell(&date_time, &json!("2024-03-01 10:00:00")).unwrap(),
            Cell::Timestamp(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())
        );
        assert!(JsonConverter::to_cell(&date_time, &json!("yesterday")).is_err());

        let time = column(vec![AbstractType::Time], true);
        assert_eq!(
            JsonConverter::to_cell(&time, &json!("12:30:01")).unwrap(),
            Cell::Time(NaiveTime::from_hms_opt(12, 30, 1).unwrap())
        );

        let mixed = column(vec![AbstractType::DateTime, AbstractType::String], true);
        assert_eq!(
            JsonConverter::to_cell(&mixed, &json!("yesterday")).unwrap(),
            Cell::String("yesterday".to_string())
        );
    }

    #[test]
    fn null_requires_nullable_column() {
        let required = column(vec![AbstractType::String], false);
        let err = JsonConverter::to_cell(&required, &Value::Null).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);

        let optional = column(vec![AbstractType::String], true);
        assert_eq!(
            JsonConverter::to_cell(&optional, &Value::Null).unwrap(),
            Cell::Null
        );
    }

    #[test]
    fn untyped_column_accepts_everything() {
        let untyped = ColumnSchema::new("value", vec![], true);

        assert_eq!(
            JsonConverter::to_cell(&untyped, &json!({"a": 1})).unwrap(),
            Cell::String("{\"a\":1}".to_string())
        );
        assert_eq!(
            JsonConverter::to_cell(&untyped, &json!("plain")).unwrap(),
            Cell::String("plain".to_string())
        );
    }

    #[test]
    fn nested_values_need_declaration() {
        let object = column(vec![AbstractType::Object], true);
        assert!(matches!(
            JsonConverter::to_cell(&object, &json!({"a": [1]})).unwrap(),
            Cell::Object(_)
        ));

        let err = JsonConverter::to_cell(&object, &json!([1, 2])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
    }
}
