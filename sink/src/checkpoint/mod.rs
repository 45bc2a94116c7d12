//! Emission of STATE checkpoints once the data they cover is committed.

mod emitter;
mod manager;

pub use emitter::*;
pub use manager::*;
