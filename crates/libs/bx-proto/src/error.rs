//! Error types for the BX wire protocol.

/// Errors that can occur while framing or decoding protocol messages.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Connection closed by peer")]
    ConnectionClosed,
}
