//! Low-level process management utilities.

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;

/// Final state of a reaped subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Exited with status zero.
    Success,
    /// Exited with the given non-zero status.
    Failure(i32),
    /// Terminated by a signal, or killed before exiting.
    Killed,
}

impl ExitCode {
    /// Whether the process exited cleanly.
    pub fn success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }

    /// Numeric exit code for wire transfer; killed processes report -1.
    pub fn as_i32(&self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::Failure(code) => *code,
            ExitCode::Killed => -1,
        }
    }

    /// Reconstructs an exit code received over the wire.
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => ExitCode::Success,
            -1 => ExitCode::Killed,
            other => ExitCode::Failure(other),
        }
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        if status.success() {
            ExitCode::Success
        } else {
            match status.code() {
                Some(code) => ExitCode::Failure(code),
                None => ExitCode::Killed,
            }
        }
    }
}

/// Spawns a shell command.
///
/// The command string is handed to `/bin/sh -c` unmodified. Without
/// `use_console`, stdin is closed and stdout/stderr are piped for capture;
/// console commands inherit the caller's terminal and produce no captured
/// output.
///
/// # Examples
///
/// ```rust,no_run
/// let child = bx_io::process::spawn_shell("echo hello", false, None).unwrap();
/// ```
pub fn spawn_shell(command: &str, use_console: bool, current_dir: Option<&Path>) -> io::Result<Child> {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command);
    if let Some(dir) = current_dir {
        cmd.current_dir(dir);
    }
    if use_console {
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
    } else {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
    }
    cmd.kill_on_drop(true);
    cmd.spawn()
}

async fn read_stream<R: AsyncReadExt + Unpin>(tx: mpsc::UnboundedSender<String>, mut stream: R) {
    let mut buffer = [0u8; 1024];
    loop {
        match stream.read(&mut buffer).await {
            Ok(0) => break, // EOF
            Ok(n) => {
                let data = String::from_utf8_lossy(&buffer[..n]);
                if tx.send(data.to_string()).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

/// Drains a child's stdout and stderr into one merged transcript.
///
/// Chunks are appended in arrival order, so the merge interleaves the two
/// streams the way a terminal would. Must run while the child executes;
/// waiting first can deadlock on pipe backpressure.
pub async fn drain_merged(stdout: Option<ChildStdout>, stderr: Option<ChildStderr>) -> String {
    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Some(stream) = stdout {
        tokio::spawn(read_stream(tx.clone(), stream));
    }
    if let Some(stream) = stderr {
        tokio::spawn(read_stream(tx.clone(), stream));
    }
    drop(tx);

    let mut output = String::new();
    while let Some(chunk) = rx.recv().await {
        output.push_str(&chunk);
    }
    output
}
