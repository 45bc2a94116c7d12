//! Stream schemas and their reconciliation against destination tables.

mod mapper;
mod naming;
mod reconciler;
mod registry;
mod stream;

pub use mapper::*;
pub use naming::*;
pub use reconciler::*;
pub use registry::*;
pub use stream::*;
