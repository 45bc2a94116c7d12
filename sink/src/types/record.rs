use std::collections::BTreeMap;
use std::fmt;

use crate::types::Cell;

/// Identifier of a stream, as it appears in the `stream` field of messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StreamId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A record validated against a specific schema version of its stream.
///
/// Records are immutable once they are appended to a buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub stream: StreamId,
    /// Version of the stream schema the record was validated against.
    pub schema_version: u64,
    /// Position of the record in its stream, starting at 1.
    pub sequence: u64,
    /// Values by lower-cased column name; undeclared properties are not present.
    pub cells: BTreeMap<String, Cell>,
}

impl Record {
    /// Returns the value of `column`, treating absent columns as null.
    pub fn cell(&self, column: &str) -> &Cell {
        self.cells.get(column).unwrap_or(&Cell::Null)
    }
}
