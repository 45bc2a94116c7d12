//! Configuration management for the stream sink.
//!
//! Provides environment detection, configuration loading from JSON or YAML files with
//! environment variable overrides, secret handling, and the shared configuration types
//! consumed by the sink library and the `target-postgres` binary.

mod environment;
mod load;
mod secret;
pub mod shared;

pub use environment::*;
pub use load::*;
pub use secret::*;
