//! Execution of dispatched commands.
//!
//! Each `RunCommand` becomes one shell invocation in the build directory:
//! output parent directories are created, the response file is written if
//! the command declares one, and after the process is reaped every declared
//! output is hashed. A missing output yields an empty-string MD5, which can
//! never match the master's recomputation, so the edge falls back to a
//! local run there.

use std::path::Path;

use bx_io::process::{self, ExitCode};
use bx_proto::message::RunCommandRequest;
use md5::{Digest, Md5};
use tracing::warn;

/// Everything the slave reports back for one command.
#[derive(Debug)]
pub struct CommandOutcome {
    pub exit: ExitCode,
    pub output: String,
    pub output_md5s: Vec<String>,
}

impl CommandOutcome {
    fn setup_failure(request: &RunCommandRequest, message: String) -> Self {
        Self {
            exit: ExitCode::Failure(-1),
            output: message,
            output_md5s: vec![String::new(); request.output_paths.len()],
        }
    }
}

/// Hex MD5 of a file's contents, or an empty string if it cannot be read.
pub async fn md5_hex_of_file(path: &Path) -> String {
    match tokio::fs::read(path).await {
        Ok(contents) => format!("{:x}", Md5::digest(&contents)),
        Err(_) => String::new(),
    }
}

async fn ensure_parent_dirs(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

/// Runs one dispatched command to completion inside `build_dir`.
pub async fn run_command(build_dir: &Path, request: &RunCommandRequest) -> CommandOutcome {
    for output in &request.output_paths {
        let path = build_dir.join(output);
        if let Err(err) = ensure_parent_dirs(&path).await {
            warn!("Failed to create directory for output {output} - {err}");
            return CommandOutcome::setup_failure(
                request,
                format!("failed to create directory for {output}: {err}"),
            );
        }
    }

    if let Some(rspfile) = &request.rspfile_path {
        let path = build_dir.join(rspfile);
        let content = request.rspfile_content.as_deref().unwrap_or_default();
        let write = async {
            ensure_parent_dirs(&path).await?;
            tokio::fs::write(&path, content).await
        };
        if let Err(err) = write.await {
            warn!("Failed to write response file {rspfile} - {err}");
            return CommandOutcome::setup_failure(
                request,
                format!("failed to write response file {rspfile}: {err}"),
            );
        }
    }

    let mut child = match process::spawn_shell(&request.command, false, Some(build_dir)) {
        Ok(child) => child,
        Err(err) => {
            warn!("Failed to spawn command for edge {} - {err}", request.edge_id);
            return CommandOutcome::setup_failure(request, format!("failed to spawn: {err}"));
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let output_handle = tokio::spawn(process::drain_merged(stdout, stderr));

    let exit = match child.wait().await {
        Ok(status) => ExitCode::from(status),
        Err(err) => {
            warn!("Failed to wait for edge {} - {err}", request.edge_id);
            ExitCode::Killed
        }
    };
    let output = output_handle.await.unwrap_or_default();

    let mut output_md5s = Vec::with_capacity(request.output_paths.len());
    for path in &request.output_paths {
        output_md5s.push(md5_hex_of_file(&build_dir.join(path)).await);
    }

    CommandOutcome {
        exit,
        output,
        output_md5s,
    }
}
