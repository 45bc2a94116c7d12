//! Load tasks and the pool bounding how many run at once.

pub mod load;
pub mod pool;
