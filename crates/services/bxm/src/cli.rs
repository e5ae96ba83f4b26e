//! Command-line interface for the BX Master Service.

use clap::Parser;
use std::path::PathBuf;

/// Command-line interface for the BX Master Service.
#[derive(Parser)]
#[command(name = "bxm")]
#[command(about = "BX Master - build a graph of commands across local and remote executors")]
pub struct Cli {
    /// IP address the RPC listener binds to
    #[arg(long, default_value = "0.0.0.0")]
    pub bind_ip: String,

    /// RPC port slaves connect to
    #[arg(long, default_value_t = 9310)]
    pub port: u16,

    /// Path to the build manifest
    #[arg(long, default_value = "build.toml")]
    pub manifest: PathBuf,

    /// Space separated targets to build; the manifest defaults when absent
    #[arg(long)]
    pub targets: Option<String>,

    /// Defer the build until this many slaves have registered
    #[arg(long)]
    pub max_slave_amount: Option<usize>,

    /// Port of the read-only build status mirror
    #[arg(long, default_value_t = 9320)]
    pub webui_port: u16,

    /// Directory the build runs in
    #[arg(long, default_value = ".")]
    pub build_dir: PathBuf,
}
