//! Command-line interface for the BX Slave Service.

use clap::Parser;
use std::path::PathBuf;

/// Command-line interface for the BX Slave Service.
#[derive(Parser)]
#[command(name = "bxs")]
#[command(about = "BX Slave - run build commands for a BX master and serve the artifacts")]
pub struct Cli {
    /// IP address of the master
    #[arg(long)]
    pub master_ip: String,

    /// RPC port of the master
    #[arg(long, default_value_t = 9310)]
    pub port: u16,

    /// Port of the artifact file server
    #[arg(long, default_value_t = 8080)]
    pub artifact_port: u16,

    /// Directory commands run in and artifacts are served from
    #[arg(long, default_value = ".")]
    pub build_dir: PathBuf,
}
