//! Shutdown signalling and stream adapters used by the pipeline.

pub mod shutdown;
pub mod signal;
pub mod stream;
