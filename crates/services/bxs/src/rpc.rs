//! Connection management for communicating with the BX master.
//!
//! The slave opens one framed TCP connection and keeps it for its whole
//! lifetime. The first frame is always the `SystemInfo` handshake; after
//! that a single loop multiplexes incoming dispatches, periodic status
//! updates, and completion reports from spawned command tasks. The master
//! replies to an incompatible handshake with `Quit`, which ends the loop.

use std::path::PathBuf;
use std::time::Duration;

use bx_proto::framing;
use bx_proto::message::{MasterMessage, RunCommandRequest, SlaveMessage};
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::Cli;
use crate::prelude::*;
use crate::runner::{self, CommandOutcome};
use crate::system::{self, StatusSampler};

/// How often the slave reports load and memory to the master.
const STATUS_INTERVAL: Duration = Duration::from_secs(3);

/// Connects to the master and serves dispatches until it quits us, the
/// connection drops, or an I/O error occurs.
///
/// # Arguments
///
/// * `cli` - Parsed command line (master address, ports)
/// * `build_dir` - Canonicalized directory commands run in
pub async fn connect_and_serve(cli: &Cli, build_dir: PathBuf) -> Result<()> {
    let address = format!("{}:{}", cli.master_ip, cli.port);
    info!("Connecting to master at {address}");
    let stream = TcpStream::connect(&address).await?;
    let mut framed = framing::framed(stream);

    let info = system::system_info(cli.artifact_port);
    framing::send(&mut framed, &SlaveMessage::SystemInfo(info)).await?;
    info!("Registered with master at {address}");

    let (done_tx, mut done_rx) = mpsc::channel::<(RunCommandRequest, CommandOutcome)>(32);
    let mut status_interval = tokio::time::interval(STATUS_INTERVAL);
    let mut sampler = StatusSampler::new();
    let mut running_commands: u32 = 0;

    loop {
        tokio::select! {
            frame = framed.next() => {
                let frame = match frame {
                    None => {
                        warn!("Master closed the connection");
                        break;
                    }
                    Some(frame) => frame.map_err(bx_proto::error::Error::from)?,
                };
                match framing::decode_message::<MasterMessage>(&frame)? {
                    MasterMessage::RunCommand(request) => {
                        info!("Running edge {}: {}", request.edge_id, request.command);
                        running_commands += 1;
                        let tx = done_tx.clone();
                        let build_dir = build_dir.clone();
                        tokio::spawn(async move {
                            let outcome = runner::run_command(&build_dir, &request).await;
                            if tx.send((request, outcome)).await.is_err() {
                                warn!("Connection loop gone before command completion");
                            }
                        });
                    }
                    MasterMessage::Quit { reason } => {
                        info!("Master asked us to quit: {reason}");
                        break;
                    }
                }
            }
            Some((request, outcome)) = done_rx.recv() => {
                running_commands = running_commands.saturating_sub(1);
                debug!(
                    "Edge {} finished with {:?}",
                    request.edge_id, outcome.exit
                );
                framing::send(&mut framed, &SlaveMessage::CommandDone {
                    edge_id: request.edge_id,
                    exit_code: outcome.exit.as_i32(),
                    output: outcome.output,
                    output_md5s: outcome.output_md5s,
                }).await?;
            }
            _ = status_interval.tick() => {
                let status = sampler.sample(running_commands);
                framing::send(&mut framed, &SlaveMessage::StatusUpdate(status)).await?;
            }
        }
    }
    Ok(())
}
