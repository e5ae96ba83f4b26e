//! RPC listener for slave connections.
//!
//! Each accepted connection gets a monotonically numbered id, a writer task
//! draining the driver's outgoing queue, and a read loop turning incoming
//! frames into driver events. Socket I/O lives entirely here; all state
//! transitions happen on the driver side.

use std::net::SocketAddr;

use bx_proto::framing;
use bx_proto::message::{MasterMessage, SlaveMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::driver::DriverEvent;
use crate::prelude::*;

/// Binds the RPC listener and starts accepting slaves.
///
/// # Arguments
/// * `bind_ip` - Address to bind on
/// * `port` - Port slaves connect to
/// * `events` - Driver event channel connections report into
///
/// # Returns
/// A JoinHandle for the accept-loop task.
pub async fn setup_rpc(
    bind_ip: &str,
    port: u16,
    events: mpsc::Sender<DriverEvent>,
) -> Result<JoinHandle<()>> {
    let listener = TcpListener::bind(format!("{bind_ip}:{port}")).await?;
    info!("RPC listening on {bind_ip}:{port}");

    let handle = tokio::spawn(async move {
        let mut next_connection_id: u64 = 0;
        loop {
            match listener.accept().await {
                Ok((stream, address)) => {
                    next_connection_id += 1;
                    let connection_id = next_connection_id;
                    debug!("Slave connection {connection_id} from {address}");
                    let events = events.clone();
                    tokio::spawn(handle_connection(connection_id, stream, address, events));
                }
                Err(err) => {
                    error!("Failed to accept connection: {err}");
                }
            }
        }
    });
    Ok(handle)
}

/// Runs one slave connection until either side closes it.
async fn handle_connection(
    connection_id: u64,
    stream: TcpStream,
    address: SocketAddr,
    events: mpsc::Sender<DriverEvent>,
) {
    let framed = framing::framed(stream);
    let (mut sink, mut read) = framed.split();

    // The driver enqueues outgoing messages here; dropping the sender is
    // how it closes the connection (the writer drains, then shuts the
    // socket down).
    let (tx, mut rx) = mpsc::unbounded_channel::<MasterMessage>();
    if events
        .send(DriverEvent::SlaveConnected {
            connection_id,
            address,
            tx,
        })
        .await
        .is_err()
    {
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let frame = match framing::encode_message(&message) {
                Ok(frame) => frame,
                Err(err) => {
                    error!("Failed to encode message for slave {connection_id} - {err}");
                    continue;
                }
            };
            if sink.send(frame).await.is_err() {
                warn!("Failed to write to slave {connection_id}");
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = read.next().await {
        let message = frame
            .map_err(Error::from)
            .and_then(|frame| framing::decode_message::<SlaveMessage>(&frame).map_err(Error::from));
        match message {
            Ok(message) => {
                if events
                    .send(DriverEvent::SlaveMessage {
                        connection_id,
                        message,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(err) => {
                warn!("Bad frame from slave {connection_id} - {err}");
                break;
            }
        }
    }

    debug!("Slave connection {connection_id} closed");
    let _ = events
        .send(DriverEvent::SlaveClosed { connection_id })
        .await;
    writer.abort();
}
