//! On-disk build description.
//!
//! A build manifest is a TOML file listing every edge of the build graph
//! with its inputs, outputs, and fully expanded command line, plus an
//! optional list of default targets. It is the hand-off format from whatever
//! produced the graph; nothing in it is re-evaluated or expanded here.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// One edge of the build graph as described in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEdge {
    /// Files the command produces.
    pub outputs: Vec<String>,
    /// Files the command reads. Inputs without a producing edge are treated
    /// as source files.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Fully expanded command line.
    pub command: String,
    /// Response file to write before running the command.
    #[serde(default)]
    pub rspfile: Option<String>,
    /// Contents of the response file.
    #[serde(default)]
    pub rspfile_content: Option<String>,
    /// Run the command on the console instead of capturing its output.
    #[serde(default)]
    pub use_console: bool,
}

/// A complete build description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    /// Targets built when none are requested explicitly. When empty, every
    /// output no other edge consumes is a default.
    #[serde(default)]
    pub defaults: Vec<String>,
    /// The edges of the graph.
    #[serde(default)]
    pub edges: Vec<ManifestEdge>,
}

impl BuildManifest {
    /// Load a manifest from a TOML file.
    pub fn from_file(file_path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(file_path)?;
        Self::from_toml(&contents)
    }

    /// Parse a manifest from a TOML string.
    pub fn from_toml(value: &str) -> Result<Self> {
        Ok(toml::from_str(value)?)
    }
}
