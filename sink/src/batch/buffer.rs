use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::types::{Record, StreamId};

/// Why a stream buffer is flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The buffer holds `batch_size` records.
    BatchFull,
    /// A record of a newer schema version arrived.
    SchemaChanged,
    /// The buffer is older than `max_batch_fill_ms`.
    Expired,
    /// The input ended.
    EndOfInput,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            FlushReason::BatchFull => "batch_full",
            FlushReason::SchemaChanged => "schema_changed",
            FlushReason::Expired => "expired",
            FlushReason::EndOfInput => "end_of_input",
        };

        f.write_str(reason)
    }
}

/// Result of [`BatchBuffer::append`].
#[derive(Debug, PartialEq)]
pub enum AppendOutcome {
    Appended,
    /// The stream buffer must be drained first; the record is handed back untouched.
    FlushRequired(FlushReason, Record),
}

/// Records of one stream and one schema version, loaded as a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub stream: StreamId,
    pub schema_version: u64,
    pub records: Vec<Record>,
    pub first_sequence: u64,
    /// Checkpoints depending on this stream up to this sequence are released by the batch.
    pub last_sequence: u64,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug)]
struct StreamBuffer {
    schema_version: u64,
    records: Vec<Record>,
    started_at: Instant,
}

/// Buffers of all streams, each bounded by `batch_size` records.
#[derive(Debug)]
pub struct BatchBuffer {
    batch_size: usize,
    max_fill: Option<Duration>,
    buffers: HashMap<StreamId, StreamBuffer>,
}

impl BatchBuffer {
    pub fn new(batch_size: usize, max_fill: Option<Duration>) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_fill,
            buffers: HashMap::new(),
        }
    }

    /// Appends `record` to its stream buffer.
    ///
    /// Returns [`AppendOutcome::FlushRequired`] without appending when the buffer already
    /// holds `batch_size` records or holds records of another schema version.
    pub fn append(&mut self, record: Record) -> AppendOutcome {
        match self.buffers.get_mut(&record.stream) {
            Some(buffer) if !buffer.records.is_empty() => {
                if buffer.schema_version != record.schema_version {
                    return AppendOutcome::FlushRequired(FlushReason::SchemaChanged, record);
                }
                if buffer.records.len() >= self.batch_size {
                    return AppendOutcome::FlushRequired(FlushReason::BatchFull, record);
                }

                buffer.records.push(record);
            }
            _ => {
                let stream = record.stream.clone();
                let schema_version = record.schema_version;
                let mut records = Vec::with_capacity(self.batch_size.min(1024));
                records.push(record);

                self.buffers.insert(
                    stream,
                    StreamBuffer {
                        schema_version,
                        records,
                        started_at: Instant::now(),
                    },
                );
            }
        }

        AppendOutcome::Appended
    }

    /// Removes and returns the buffered records of `stream`, if any.
    pub fn drain(&mut self, stream: &StreamId) -> Option<Batch> {
        let buffer = self.buffers.remove(stream)?;
        let first_sequence = buffer.records.first()?.sequence;
        let last_sequence = buffer.records.last()?.sequence;

        Some(Batch {
            stream: stream.clone(),
            schema_version: buffer.schema_version,
            records: buffer.records,
            first_sequence,
            last_sequence,
        })
    }

    /// Drops the buffered records of `stream` and returns how many were dropped.
    pub fn discard(&mut self, stream: &StreamId) -> usize {
        self.buffers
            .remove(stream)
            .map(|buffer| buffer.records.len())
            .unwrap_or(0)
    }

    pub fn len(&self, stream: &StreamId) -> usize {
        self.buffers
            .get(stream)
            .map(|buffer| buffer.records.len())
            .unwrap_or(0)
    }

    pub fn is_full(&self, stream: &StreamId) -> bool {
        self.len(stream) >= self.batch_size
    }

    /// Returns the streams whose buffer was started more than `max_batch_fill_ms` before `now`.
    pub fn expired(&self, now: Instant) -> Vec<StreamId> {
        let Some(max_fill) = self.max_fill else {
            return vec![];
        };

        let mut streams: Vec<StreamId> = self
            .buffers
            .iter()
            .filter(|(_, buffer)| {
                !buffer.records.is_empty()
                    && now.saturating_duration_since(buffer.started_at) >= max_fill
            })
            .map(|(stream, _)| stream.clone())
            .collect();
        streams.sort();

        streams
    }

    /// Returns every stream with buffered records, in a stable order.
    pub fn streams(&self) -> Vec<StreamId> {
        let mut streams: Vec<StreamId> = self
            .buffers
            .iter()
            .filter(|(_, buffer)| !buffer.records.is_empty())
            .map(|(stream, _)| stream.clone())
            .collect();
        streams.sort();

        streams
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(stream: &str, version: u64, sequence: u64) -> Record {
        Record {
            stream: StreamId::from(stream),
            schema_version: version,
            sequence,
            cells: BTreeMap::new(),
        }
    }

    #[test]
    fn never_exceeds_batch_size() {
        let mut buffer = BatchBuffer::new(2, None);
        let users = StreamId::from("users");

        assert_eq!(buffer.append(record("users", 1, 1)), AppendOutcome::Appended);
        assert_eq!(buffer.append(record("users", 1, 2)), AppendOutcome::Appended);
        assert!(buffer.is_full(&users));

        let outcome = buffer.append(record("users", 1, 3));
        assert_eq!(
            outcome,
            AppendOutcome::FlushRequired(FlushReason::BatchFull, record("users", 1, 3))
        );
        assert_eq!(buffer.len(&users), 2);

        let batch = buffer.drain(&users).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.first_sequence, 1);
        assert_eq!(batch.last_sequence, 2);
        assert_eq!(buffer.len(&users), 0);
        assert!(buffer.drain(&users).is_none());
    }

    #[test]
    fn schema_version_change_requires_flush() {
        let mut buffer = BatchBuffer::new(10, None);

        buffer.append(record("users", 1, 1));
        let outcome = buffer.append(record("users", 2, 2));
        assert!(matches!(
            outcome,
            AppendOutcome::FlushRequired(FlushReason::SchemaChanged, _)
        ));

        let batch = buffer.drain(&StreamId::from("users")).unwrap();
        assert_eq!(batch.schema_version, 1);
        assert_eq!(buffer.append(record("users", 2, 2)), AppendOutcome::Appended);
        assert_eq!(
            buffer.drain(&StreamId::from("users")).unwrap().schema_version,
            2
        );
    }

    #[test]
    fn streams_are_independent() {
        let mut buffer = BatchBuffer::new(1, None);

        buffer.append(record("users", 1, 1));
        assert_eq!(buffer.append(record("orders", 1, 1)), AppendOutcome::Appended);

        assert_eq!(buffer.len(&StreamId::from("users")), 1);
        assert_eq!(buffer.len(&StreamId::from("orders")), 1);
        assert_eq!(
            buffer.streams(),
            vec![StreamId::from("orders"), StreamId::from("users")]
        );

        assert_eq!(buffer.discard(&StreamId::from("users")), 1);
        assert_eq!(buffer.streams(), vec![StreamId::from("orders")]);
    }

    #[tokio::test(start_paused = true)]
    async fn buffers_expire_after_max_fill() {
        let mut buffer = BatchBuffer::new(10, Some(Duration::from_millis(100)));
        buffer.append(record("users", 1, 1));
        assert!(buffer.expired(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_millis(150)).await;
        buffer.append(record("orders", 1, 1));

        assert_eq!(buffer.expired(Instant::now()), vec![StreamId::from("users")]);
    }
}
