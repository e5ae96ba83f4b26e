//! Pool of running subprocesses with completion multiplexing.

use std::collections::HashMap;
use std::io;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::process::{self, ExitCode};

/// Identifier of a subprocess within one [`SubprocessSet`].
pub type SubprocessId = u64;

/// A subprocess that has drained its output and been reaped.
#[derive(Debug)]
pub struct FinishedProcess {
    /// Id returned by [`SubprocessSet::add`].
    pub id: SubprocessId,
    /// Final exit state.
    pub exit: ExitCode,
    /// Merged stdout and stderr.
    pub output: String,
}

/// A set of concurrently running subprocesses.
///
/// The set itself does not bound concurrency; callers enforce their
/// parallelism budget against [`SubprocessSet::tracked`], which counts both
/// running processes and finished ones not yet collected.
pub struct SubprocessSet {
    next_id: SubprocessId,
    running: HashMap<SubprocessId, CancellationToken>,
    finished_tx: mpsc::UnboundedSender<FinishedProcess>,
    finished_rx: mpsc::UnboundedReceiver<FinishedProcess>,
}

impl SubprocessSet {
    pub fn new() -> Self {
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        Self {
            next_id: 0,
            running: HashMap::new(),
            finished_tx,
            finished_rx,
        }
    }

    /// Spawns a shell command and tracks it.
    ///
    /// Returns the error unchanged when the OS rejects the spawn; nothing is
    /// tracked in that case.
    pub fn add(&mut self, command: &str, use_console: bool) -> io::Result<SubprocessId> {
        let mut child = process::spawn_shell(command, use_console, None)?;
        let id = self.next_id;
        self.next_id += 1;

        let token = CancellationToken::new();
        self.running.insert(id, token.clone());

        let tx = self.finished_tx.clone();
        tokio::spawn(async move {
            let stdout = child.stdout.take();
            let stderr = child.stderr.take();
            let output_handle = tokio::spawn(process::drain_merged(stdout, stderr));

            let exit = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => ExitCode::from(status),
                    Err(err) => {
                        warn!("Failed to wait for subprocess {id} - {err}");
                        ExitCode::Killed
                    }
                },
                _ = token.cancelled() => {
                    if let Err(err) = child.start_kill() {
                        warn!("Failed to kill subprocess {id} - {err}");
                    }
                    let _ = child.wait().await;
                    ExitCode::Killed
                }
            };

            let output = output_handle.await.unwrap_or_default();
            let _ = tx.send(FinishedProcess { id, exit, output });
        });

        Ok(id)
    }

    /// Number of tracked subprocesses: running plus finished-but-uncollected.
    pub fn tracked(&self) -> usize {
        self.running.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    /// Waits for the next subprocess to finish.
    ///
    /// Returns `None` when the set tracks nothing. Completions belonging to
    /// processes discarded by [`SubprocessSet::clear`] are skipped.
    pub async fn wait_next(&mut self) -> Option<FinishedProcess> {
        while !self.running.is_empty() {
            let finished = self.finished_rx.recv().await?;
            if self.running.remove(&finished.id).is_some() {
                return Some(finished);
            }
        }
        None
    }

    /// Collects a finished subprocess without waiting.
    pub fn try_next(&mut self) -> Option<FinishedProcess> {
        while let Ok(finished) = self.finished_rx.try_recv() {
            if self.running.remove(&finished.id).is_some() {
                return Some(finished);
            }
        }
        None
    }

    /// Kills and discards every tracked subprocess.
    pub fn clear(&mut self) {
        for (_, token) in self.running.drain() {
            token.cancel();
        }
        while self.finished_rx.try_recv().is_ok() {}
    }
}

impl Default for SubprocessSet {
    fn default() -> Self {
        Self::new()
    }
}
