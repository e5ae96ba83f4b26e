//! Read-only HTTP view of the build directory.
//!
//! The master fetches produced outputs with plain `GET /<path>` requests;
//! the path component is the literal output path from the dispatch. Hits
//! stream raw file bytes, everything else is a 404: missing files,
//! directories, and paths that resolve outside the build directory.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::prelude::*;

/// Starts the artifact file server on the given port.
///
/// # Arguments
///
/// * `root` - Canonicalized build directory to serve
/// * `port` - TCP port to listen on
///
/// # Returns
/// A JoinHandle for the server task.
pub async fn setup_file_server(root: PathBuf, port: u16) -> Result<JoinHandle<Result<()>>> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::debug!("Artifact server listening on port {port}");
    Ok(serve(listener, root))
}

/// Serves the build directory on an already-bound listener.
pub fn serve(listener: TcpListener, root: PathBuf) -> JoinHandle<Result<()>> {
    let app = Router::new()
        .route("/{*path}", get(serve_file))
        .with_state(Arc::new(root));

    tokio::spawn(async move {
        axum::serve(listener, app).await?;
        Ok(())
    })
}

async fn serve_file(State(root): State<Arc<PathBuf>>, Path(path): Path<String>) -> Response {
    // Canonicalizing resolves symlinks and `..` segments, so anything that
    // escapes the build directory fails the prefix check below.
    let full = match tokio::fs::canonicalize(root.join(&path)).await {
        Ok(full) => full,
        Err(_) => {
            debug!("Artifact miss: {path}");
            return StatusCode::NOT_FOUND.into_response();
        }
    };
    if !full.starts_with(root.as_ref()) {
        debug!("Rejected path outside build directory: {path}");
        return StatusCode::NOT_FOUND.into_response();
    }
    match tokio::fs::metadata(&full).await {
        Ok(metadata) if metadata.is_file() => {}
        _ => return StatusCode::NOT_FOUND.into_response(),
    }

    match tokio::fs::File::open(&full).await {
        Ok(file) => Body::from_stream(ReaderStream::new(file)).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
