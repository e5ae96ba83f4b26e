//! BX Slave Service (bxs)
//!
//! A worker that joins a BX master and executes build commands on its
//! behalf. It provides:
//!
//! - **RPC Client**: A long-lived framed TCP connection to the master,
//!   carrying the system-info handshake, periodic status updates, and one
//!   completion report per dispatched command.
//! - **Command Runner**: Shell execution of dispatched commands with merged
//!   output capture and per-output MD5 digests.
//! - **Artifact File Server**: A read-only HTTP view of the build directory
//!   so the master can fetch produced outputs.
//!
//! The slave is stateless across restarts; reconnecting registers it with
//! the master from scratch.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;
use crate::prelude::*;

mod cli;
mod error;
mod fileserver;
mod prelude;
mod rpc;
mod runner;
mod system;

/// Main entry point for the BX Slave Service.
///
/// Initializes logging, starts the artifact file server, and runs the RPC
/// connection loop until the master says quit, the connection drops, or a
/// shutdown signal arrives.
///
/// # Examples
///
/// ```bash
/// bxs --master-ip 10.0.0.1 --port 9310 --artifact-port 8080 --build-dir /work/tree
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bxs=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let build_dir = std::fs::canonicalize(&cli.build_dir)?;
    tracing::info!("Serving and building in {}", build_dir.display());

    let file_server = fileserver::setup_file_server(build_dir.clone(), cli.artifact_port).await?;

    tokio::select! {
        result = rpc::connect_and_serve(&cli, build_dir) => {
            match result {
                Ok(()) => tracing::info!("Connection to master ended"),
                Err(err) => {
                    tracing::error!("RPC connection failed: {err}");
                    return Err(err);
                }
            }
        }
        result = file_server => {
            tracing::error!("File server stopped: {:?}", result);
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}
