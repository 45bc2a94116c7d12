//! PostgreSQL destination.
//!
//! DDL is issued statement by statement. Write plans go through a temporary staging table
//! filled with `COPY`, then merged into the target table within one transaction.

mod client;
mod copy;
mod core;
mod sql;
mod types;

pub use client::PgClientPool;
pub use core::PostgresDestination;
