//! BX Master Service (bxm)
//!
//! The master drives a build graph to completion across a pool of
//! dynamically-joining slave workers. It provides:
//!
//! - **RPC Server**: Framed TCP endpoint slaves register with and receive
//!   command dispatches over
//! - **Build Driver**: Admission control and local/remote dispatch for every
//!   ready edge of the graph
//! - **Artifact Fetcher**: HTTP retrieval of remotely produced outputs with
//!   MD5 verification
//! - **Status Mirror**: A read-only JSON view of build progress
//!
//! Slaves are best-effort accelerators: a build with zero slaves simply
//! runs everything locally, and any remote failure falls back to a local
//! run of the affected edge.

use std::sync::Arc;

use bx_graph::{BuildManifest, Builder, State};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;
use crate::driver::{DriverEvent, MasterDriver};
use crate::fetch::Fetcher;
use crate::prelude::*;

mod cli;
mod driver;
mod error;
mod fetch;
mod prelude;
mod registry;
mod rpc;
mod webui;

fn resolve_targets(cli: &Cli, state: &State) -> Result<Vec<String>> {
    match &cli.targets {
        Some(value) if !value.trim().is_empty() => value
            .split_whitespace()
            .map(|target| state.collect_target(target).map_err(Error::from))
            .collect(),
        _ => Ok(state.default_nodes()?),
    }
}

/// Main entry point for the BX Master Service.
///
/// Loads the build manifest, starts the RPC listener and status mirror,
/// optionally waits for the requested number of slaves, then runs the build
/// to completion. Exits zero on success and nonzero on a graph or dispatch
/// failure.
///
/// # Examples
///
/// ```bash
/// bxm --manifest build.toml --targets "app tests" --max-slave-amount 2
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bxm=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let manifest = BuildManifest::from_file(&cli.manifest)?;
    let state = Arc::new(State::from_manifest(manifest)?);
    info!(
        "Loaded {} edge(s) from {}",
        state.edge_count(),
        cli.manifest.display()
    );

    let build_dir = std::fs::canonicalize(&cli.build_dir)?;
    std::env::set_current_dir(&build_dir)?;

    let (events_tx, events_rx) = mpsc::channel(64);
    let (web_tx, web_rx) = mpsc::unbounded_channel();

    let _rpc = rpc::setup_rpc(&cli.bind_ip, cli.port, events_tx.clone()).await?;
    let _web = webui::setup_webui(cli.webui_port, web_rx).await?;

    let interrupt_tx = events_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, aborting build");
            let _ = interrupt_tx.send(DriverEvent::Interrupted).await;
        }
    });

    let local_parallelism = std::cmp::max(1, num_cpus::get() - 1);
    let fetcher = Fetcher::new(events_tx.clone(), build_dir.clone());
    let mut driver = MasterDriver::new(
        Arc::clone(&state),
        local_parallelism,
        events_rx,
        web_tx,
        fetcher,
    );

    if let Some(amount) = cli.max_slave_amount {
        driver.wait_for_slaves(amount).await?;
    }

    let targets = resolve_targets(&cli, &state)?;
    let mut builder = Builder::new(Arc::clone(&state));
    driver.start_build(&mut builder, &targets).await?;

    info!("Build finished successfully");
    Ok(())
}
