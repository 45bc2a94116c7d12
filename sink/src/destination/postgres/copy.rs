use std::pin::pin;

use bytes::Bytes;
use futures::SinkExt;
use tokio_postgres::{CopyInSink, Transaction};

use crate::destination::postgres::sql;
use crate::error::SinkResult;
use crate::load::Row;
use crate::types::Cell;

/// Buffered bytes sent to the server in one `COPY` message.
const COPY_FLUSH_BYTES: usize = 1024 * 1024;

/// Appends `cell` in `COPY` text format.
///
/// Nulls become `\N`; backslash, tab, newline and carriage return are escaped and NUL bytes,
/// which PostgreSQL text cannot hold, are dropped.
fn encode_cell(buf: &mut Vec<u8>, cell: &Cell) {
    let Some(text) = cell.to_text() else {
        buf.extend_from_slice(b"\\N");
        return;
    };

    for byte in text.bytes() {
        match byte {
            b'\\' => buf.extend_from_slice(b"\\\\"),
            b'\t' => buf.extend_from_slice(b"\\t"),
            b'\n' => buf.extend_from_slice(b"\\n"),
            b'\r' => buf.extend_from_slice(b"\\r"),
            0 => {}
            _ => buf.push(byte),
        }
    }
}

fn encode_row(buf: &mut Vec<u8>, row: &Row) {
    for (position, cell) in row.iter().enumerate() {
        if position > 0 {
            buf.push(b'\t');
        }
        encode_cell(buf, cell);
    }
    buf.push(b'\n');
}

/// Copies `rows` into the `staging` table and returns the number of rows copied.
pub async fn copy_rows(
    transaction: &Transaction<'_>,
    staging: &str,
    columns: &[String],
    rows: &[Row],
) -> SinkResult<u64> {
    if rows.is_empty() {
        return Ok(0);
    }

    let statement = sql::copy_into(staging, columns);
    let sink: CopyInSink<Bytes> = transaction.copy_in(statement.as_str()).await?;
    let mut sink = pin!(sink);

    let mut buf = Vec::with_capacity(COPY_FLUSH_BYTES);
    for row in rows {
        encode_row(&mut buf, row);

        if buf.len() >= COPY_FLUSH_BYTES {
            sink.send(Bytes::from(std::mem::take(&mut buf))).await?;
        }
    }

    if !buf.is_empty() {
        sink.send(Bytes::from(buf)).await?;
    }

    let copied = sink.as_mut().finish().await?;

    Ok(copied)
}
