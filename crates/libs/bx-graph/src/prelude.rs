//! Common types and utilities.

/// Graph engine error type.
pub use crate::error::Error;

/// Graph engine result type.
pub type Result<T> = core::result::Result<T, Error>;
