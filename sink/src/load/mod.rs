//! Turning batches into destination writes.

mod engine;
mod plan;

pub use engine::*;
pub use plan::*;
