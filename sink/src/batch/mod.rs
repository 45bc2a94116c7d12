//! Per-stream accumulation of validated records.

mod buffer;

pub use buffer::*;
