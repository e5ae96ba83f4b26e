//! Common types and utilities.

/// Protocol error type.
pub use crate::error::Error;

/// Protocol result type.
pub type Result<T> = core::result::Result<T, Error>;
