//! Destination abstractions and implementations.
//!
//! Provides the [`Destination`] trait, an in-memory destination for tests and dry runs and,
//! behind the `postgres` feature, the PostgreSQL destination.

mod base;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use base::Destination;
