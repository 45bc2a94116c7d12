//! Logging setup shared by the sink binary and tests.

pub mod tracing;
