use std::fmt;

/// Destination column types the sink knows how to write.
///
/// [`ColumnType::Other`] stands for destination columns created outside the sink, whose
/// type is kept untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Boolean,
    Integer,
    Number,
    Time,
    Timestamp,
    Json,
    Text,
    Other,
}

impl ColumnType {
    /// Returns the least upper bound of two types.
    ///
    /// Equal types are kept, integer and number meet at number, and every other mix ends
    /// up as text.
    pub fn lub(self, other: ColumnType) -> ColumnType {
        match (self, other) {
            (a, b) if a == b => a,
            (ColumnType::Integer, ColumnType::Number) | (ColumnType::Number, ColumnType::Integer) => {
                ColumnType::Number
            }
            _ => ColumnType::Text,
        }
    }

    /// Returns whether `self` is strictly wider than `other`.
    pub fn is_wider_than(self, other: ColumnType) -> bool {
        self != other && other.lub(self) == self
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Boolean => "boolean",
            ColumnType::Integer => "integer",
            ColumnType::Number => "number",
            ColumnType::Time => "time",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Json => "json",
            ColumnType::Text => "text",
            ColumnType::Other => "other",
        };

        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lub_is_commutative_and_widens() {
        let types = [
            ColumnType::Boolean,
            ColumnType::Integer,
            ColumnType::Number,
            ColumnType::Time,
            ColumnType::Timestamp,
            ColumnType::Json,
            ColumnType::Text,
        ];

        for a in types {
            for b in types {
                let lub = a.lub(b);
                assert_eq!(lub, b.lub(a));
                assert_eq!(lub.lub(a), lub);
                assert_eq!(lub.lub(b), lub);
            }
            assert_eq!(a.lub(ColumnType::Text), ColumnType::Text);
        }

        assert_eq!(
            ColumnType::Integer.lub(ColumnType::Number),
            ColumnType::Number
        );
        assert_eq!(ColumnType::Boolean.lub(ColumnType::Integer), ColumnType::Text);
    }

    #[test]
    fn widening_is_strict() {
        assert!(ColumnType::Number.is_wider_than(ColumnType::Integer));
        assert!(ColumnType::Text.is_wider_than(ColumnType::Number));
        assert!(!ColumnType::Integer.is_wider_than(ColumnType::Number));
        assert!(!ColumnType::Text.is_wider_than(ColumnType::Text));
    }
}
