//! Messages of the line-delimited input stream.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{ErrorKind, SinkResult};
use crate::sink_error;

/// Longest slice of an offending line kept in error details.
const MAX_LINE_IN_ERROR: usize = 256;

/// A single message of the input stream, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Schema(SchemaMessage),
    Record(RecordMessage),
    State(StateMessage),
    ActivateVersion(ActivateVersionMessage),
}

/// Declares the schema of a stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SchemaMessage {
    pub stream: String,
    pub schema: Value,
    pub key_properties: Vec<String>,
    #[serde(default)]
    pub bookmark_properties: Vec<String>,
}

/// One row of a stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecordMessage {
    pub stream: String,
    pub record: Map<String, Value>,
    #[serde(default)]
    pub time_extracted: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: Option<u64>,
}

/// An opaque checkpoint, echoed to the output once everything before it is committed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StateMessage {
    pub value: Value,
}

/// Marks a new version of a stream's full table copy. Accepted and ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActivateVersionMessage {
    pub stream: String,
    pub version: u64,
}

impl Message {
    /// Returns the stream the message belongs to, if any.
    pub fn stream(&self) -> Option<&str> {
        match self {
            Message::Schema(message) => Some(&message.stream),
            Message::Record(message) => Some(&message.stream),
            Message::ActivateVersion(message) => Some(&message.stream),
            Message::State(_) => None,
        }
    }
}

/// Parses one input line into a [`Message`].
///
/// Malformed JSON, an unknown `type` and missing required fields are all reported as
/// [`ErrorKind::ProtocolError`].
pub fn parse_message(line: &str) -> SinkResult<Message> {
    serde_json::from_str(line).map_err(|err| {
        let mut excerpt: String = line.chars().take(MAX_LINE_IN_ERROR).collect();
        if excerpt.len() < line.len() {
            excerpt.push_str("...");
        }

        sink_error!(
            ErrorKind::ProtocolError,
            "Invalid message",
            format!("{err} in line: {excerpt}")
        )
    })
}
