//! Build graph engine for the BX distributed build executor.
//!
//! The engine decides *what* to build and when an edge is ready; a
//! [`build::CommandRunner`] decides *where* each edge runs. The pieces:
//!
//! - [`manifest`]: the on-disk TOML build description.
//! - [`state`]: the loaded graph: edges, producer/consumer indices,
//!   default targets.
//! - [`plan`]: want-propagation and the ready queue.
//! - [`build`]: [`build::Builder::run_build`], the loop that pulls ready
//!   edges, hands them to the runner, and feeds completions back into the
//!   plan.
//!
//! Remote execution is deliberately invisible here beyond the
//! [`build::Dispatch`] origin tag: a remote edge that never completes is
//! eventually re-issued locally, and its late remote completion is dropped.

pub mod build;
pub mod error;
pub mod manifest;
pub mod plan;
pub mod prelude;
pub mod state;

pub use build::{Builder, CommandResult, CommandRunner, Dispatch, ExitStatus};
pub use manifest::BuildManifest;
pub use state::{Edge, EdgeId, State};
