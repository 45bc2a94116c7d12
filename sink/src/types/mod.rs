//! Common types used throughout the sink.
//!
//! Includes the dynamic [`Cell`] value, validated [`Record`]s and the destination side
//! mirror of a table, [`TableState`].

mod cell;
mod column;
mod record;
mod table;

pub use cell::*;
pub use column::*;
pub use record::*;
pub use table::*;
