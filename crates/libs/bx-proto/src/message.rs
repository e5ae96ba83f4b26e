//! Message types exchanged between the BX master and its slaves.

use serde::{Deserialize, Serialize};

/// System description a slave sends right after connecting.
///
/// The master admits the slave only if `os_name` and `os_arch` match its own;
/// everything else feeds the dispatch heuristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaveSystemInfo {
    /// Operating system name, as reported by `std::env::consts::OS`.
    pub os_name: String,
    /// Processor architecture, as reported by `std::env::consts::ARCH`.
    pub os_arch: String,
    /// Number of logical processors on the slave.
    pub num_processors: u32,
    /// How many commands the slave is willing to run at once.
    pub parallelism: u32,
    /// Port of the slave's artifact file server.
    pub artifact_port: u16,
}

/// Periodic load report from a slave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaveStatus {
    /// One-minute load average.
    pub load_average: f64,
    /// Commands currently running on the slave.
    pub running_commands: u32,
    /// Available physical memory, in bytes.
    pub available_physical_memory: u64,
}

/// A command dispatch from the master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCommandRequest {
    /// Stable id of the edge this command belongs to. Echoed back in
    /// [`SlaveMessage::CommandDone`].
    pub edge_id: u64,
    /// Output files the command is expected to produce, in declared order.
    pub output_paths: Vec<String>,
    /// Response file to write before running the command, if any.
    pub rspfile_path: Option<String>,
    /// Contents of the response file.
    pub rspfile_content: Option<String>,
    /// Fully expanded command line, run through the shell.
    pub command: String,
}

/// Messages sent from slave to master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SlaveMessage {
    /// Handshake; must be the first message on a connection.
    SystemInfo(SlaveSystemInfo),
    /// Periodic load report. Ignored by the master until the handshake
    /// has been accepted.
    StatusUpdate(SlaveStatus),
    /// Completion report for one `RunCommand`.
    CommandDone {
        /// Edge id from the corresponding request.
        edge_id: u64,
        /// Process exit code; zero means success.
        exit_code: i32,
        /// Merged stdout and stderr of the command.
        output: String,
        /// Hex MD5 of each declared output, in request order. A missing
        /// output file yields an empty string so the master's verification
        /// fails and the edge is retried locally.
        output_md5s: Vec<String>,
    },
}

/// Messages sent from master to slave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MasterMessage {
    /// Run a command and report back with `CommandDone`.
    RunCommand(RunCommandRequest),
    /// Shut down; the connection is closed afterwards.
    Quit {
        /// Human-readable reason, logged by the slave.
        reason: String,
    },
}
