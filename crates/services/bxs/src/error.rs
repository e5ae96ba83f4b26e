//! Error types for the BX Slave Service.

/// Errors that can occur in the BX Slave Service.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error(transparent)]
    Proto(#[from] bx_proto::error::Error),
}
