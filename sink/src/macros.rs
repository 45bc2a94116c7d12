//! Macros for sink error handling.
//!
//! Provides convenience macros for creating and returning [`crate::error::SinkError`] instances.

/// Creates a [`crate::error::SinkError`] from error kind and description, with optional detail.
#[macro_export]
macro_rules! sink_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::SinkError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::SinkError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Creates and returns a [`crate::error::SinkError`] from the current function.
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::sink_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::sink_error!($kind, $desc, $detail))
    };
}
