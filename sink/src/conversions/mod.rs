//! Conversion of RECORD messages into validated [`crate::types::Record`]s.

mod json;
mod record;

pub use json::JsonConverter;
pub use record::RecordConverter;
