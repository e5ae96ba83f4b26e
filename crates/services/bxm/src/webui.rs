//! Read-only JSON mirror of the build state.
//!
//! The driver feeds the mirror two kinds of events: one initial status
//! document when the build starts, and one result object per finished edge.
//! An HTTP endpoint exposes the whole mirror; nothing here can influence
//! the build.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::prelude::*;

/// Events fed into the mirror.
#[derive(Debug)]
pub enum WebEvent {
    /// Serialized status document, sent once when the build starts.
    InitialStatus(String),
    /// Serialized `{"id", "result", "output"}` object, one per finished
    /// edge.
    CommandResult(String),
}

#[derive(Debug, Default, Serialize, Clone)]
struct Mirror {
    status: Option<serde_json::Value>,
    results: Vec<serde_json::Value>,
}

async fn apply_events(mirror: Arc<RwLock<Mirror>>, mut events: mpsc::UnboundedReceiver<WebEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            WebEvent::InitialStatus(json) => match serde_json::from_str(&json) {
                Ok(value) => mirror.write().await.status = Some(value),
                Err(err) => warn!("Invalid initial status document - {err}"),
            },
            WebEvent::CommandResult(json) => match serde_json::from_str(&json) {
                Ok(value) => mirror.write().await.results.push(value),
                Err(err) => warn!("Invalid command result document - {err}"),
            },
        }
    }
}

/// Starts the status mirror: a consumer task applying events and an HTTP
/// server exposing the result at `/status`.
pub async fn setup_webui(
    port: u16,
    events: mpsc::UnboundedReceiver<WebEvent>,
) -> Result<JoinHandle<Result<()>>> {
    let mirror = Arc::new(RwLock::new(Mirror::default()));
    tokio::spawn(apply_events(Arc::clone(&mirror), events));

    let app = Router::new()
        .route("/status", get(status))
        .with_state(mirror);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::debug!("Status mirror listening on port {port}");

    Ok(tokio::spawn(async move {
        axum::serve(listener, app).await?;
        Ok(())
    }))
}

async fn status(State(mirror): State<Arc<RwLock<Mirror>>>) -> Json<Mirror> {
    Json(mirror.read().await.clone())
}
