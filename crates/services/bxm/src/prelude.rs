//! Common types and utilities.

/// Master service error type.
pub use crate::error::Error;

/// Master service result type.
pub type Result<T> = core::result::Result<T, Error>;
