mod base;
mod connection;
mod destination;
mod mapping;
mod retry;
mod target;

pub use base::*;
pub use connection::*;
pub use destination::*;
pub use mapping::*;
pub use retry::*;
pub use target::*;
