//! Artifact retrieval from slave file servers.
//!
//! After a remote command succeeds, every declared output is pulled over
//! HTTP in declared order and verified against the MD5 the slave reported.
//! The first miss, truncated read, or digest mismatch abandons the whole
//! job and posts nothing back; the edge then falls to the local-retry path.
//! Only a fully verified job reaches the driver as `OutputsFetched`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bx_graph::CommandResult;
use futures_util::StreamExt;
use md5::{Digest, Md5};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info};

use crate::driver::DriverEvent;
use crate::prelude::*;

/// How many artifact jobs may run at once.
const FETCH_CONCURRENCY: usize = 4;

/// Bounded pool of artifact fetch jobs.
pub struct Fetcher {
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
    events: mpsc::Sender<DriverEvent>,
    build_dir: PathBuf,
}

impl Fetcher {
    /// Creates the pool.
    ///
    /// # Arguments
    /// * `events` - Channel completions are posted back on
    /// * `build_dir` - Directory fetched outputs are written under
    pub fn new(events: mpsc::Sender<DriverEvent>, build_dir: PathBuf) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build reqwest Client");
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(FETCH_CONCURRENCY)),
            events,
            build_dir,
        }
    }

    /// Queues one fetch job for a completed remote edge.
    ///
    /// `targets` pairs each output path with the MD5 the slave reported, in
    /// the edge's declared output order.
    pub fn spawn_fetch(&self, host: String, targets: Vec<(String, String)>, result: CommandResult) {
        let client = self.client.clone();
        let semaphore = Arc::clone(&self.semaphore);
        let events = self.events.clone();
        let build_dir = self.build_dir.clone();

        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            match fetch_targets(&client, &build_dir, &host, &targets).await {
                Ok(()) => {
                    debug!(
                        "Fetched {} output(s) for edge {} from {host}",
                        targets.len(),
                        result.edge_id
                    );
                    if events.send(DriverEvent::OutputsFetched { result }).await.is_err() {
                        info!("Driver gone before fetch completion");
                    }
                }
                // No event on failure: the edge stays outstanding and will
                // be re-run locally.
                Err(err) => error!(
                    "Failed to fetch outputs for edge {} from {host}: {err}",
                    result.edge_id
                ),
            }
        });
    }
}

/// Fetches and verifies every target in order, stopping at the first
/// failure.
pub async fn fetch_targets(
    client: &reqwest::Client,
    build_dir: &Path,
    host: &str,
    targets: &[(String, String)],
) -> Result<()> {
    for (path, expected) in targets {
        let url = format!("http://{host}/{path}");
        let actual = fetch_one(client, &build_dir.join(path), &url).await?;
        if actual != *expected {
            return Err(Error::Md5Mismatch {
                path: path.clone(),
                expected: expected.clone(),
                actual,
            });
        }
    }
    Ok(())
}

/// Streams one artifact to disk, returning the MD5 of the received bytes.
async fn fetch_one(client: &reqwest::Client, local_path: &Path, url: &str) -> Result<String> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(Error::ArtifactStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }

    if let Some(parent) = local_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mut file = tokio::fs::File::create(local_path).await?;
    let mut hasher = Md5::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(format!("{:x}", hasher.finalize()))
}
