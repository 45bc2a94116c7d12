//! Streaming sink loading a line-delimited message stream of schemas, records and state
//! checkpoints into a relational destination.
//!
//! The [`pipeline::Pipeline`] reads the input and drives a [`reader::MessageReader`], which
//! evolves destination tables with every declared schema, buffers records into batches and
//! loads them through the worker pool. Checkpoints are written out once all data they cover
//! is committed.

pub mod batch;
pub mod checkpoint;
pub mod concurrency;
pub mod conversions;
pub mod destination;
pub mod error;
pub mod load;
mod macros;
pub mod messages;
pub mod pipeline;
pub mod reader;
pub mod schema;
pub mod types;
pub mod workers;
