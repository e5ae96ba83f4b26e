//! Error types for the BX Master Service.
//!
//! Defines error variants for graph loading, dispatch, artifact retrieval,
//! and the internal event plumbing between the driver and its collaborators.

/// Errors that can occur in the BX Master Service.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Graph(#[from] bx_graph::error::Error),

    #[error(transparent)]
    Proto(#[from] bx_proto::error::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("Artifact {url} returned HTTP status {status}")]
    ArtifactStatus { url: String, status: u16 },

    #[error("MD5 mismatch for {path}: slave reported {expected}, fetched {actual}")]
    Md5Mismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Driver event channel closed")]
    EventChannelClosed,

    #[error("Build interrupted")]
    Interrupted,
}
