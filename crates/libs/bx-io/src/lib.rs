//! Subprocess execution for the BX build services.
//!
//! Provides shell command spawning with merged output capture, and
//! [`subprocess_set::SubprocessSet`], the pool both the master's local
//! executor and the slave's command runner are built on.
//!
//! # Usage
//!
//! ```rust,no_run
//! use bx_io::subprocess_set::SubprocessSet;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let mut set = SubprocessSet::new();
//!     set.add("echo hello", false)?;
//!     while let Some(finished) = set.wait_next().await {
//!         println!("exit: {:?}, output: {}", finished.exit, finished.output);
//!     }
//!     Ok(())
//! }
//! ```

pub mod process;
pub mod subprocess_set;

pub use process::ExitCode;
pub use subprocess_set::{FinishedProcess, SubprocessId, SubprocessSet};
