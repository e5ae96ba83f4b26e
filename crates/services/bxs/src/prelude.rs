//! Common types and utilities.

/// Slave service error type.
pub use crate::error::Error;

/// Slave service result type.
pub type Result<T> = core::result::Result<T, Error>;
