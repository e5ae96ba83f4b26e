//! Loaded build graph with producer/consumer indices.

use std::collections::HashMap;

use crate::manifest::BuildManifest;
use crate::prelude::*;

/// Stable identifier of an edge; assigned in manifest order.
pub type EdgeId = usize;

/// A unit of work from the build graph.
///
/// Edges are created at load time and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// Stable id, also used on the wire for remote dispatch.
    pub id: EdgeId,
    /// Output paths, in declared order.
    pub outputs: Vec<String>,
    /// Input paths.
    pub inputs: Vec<String>,
    /// Fully expanded command line.
    pub command: String,
    /// Response file path, if the command reads one.
    pub rspfile: Option<String>,
    /// Response file contents.
    pub rspfile_content: Option<String>,
    /// Whether the command needs the console.
    pub use_console: bool,
}

/// The loaded graph: edges plus the indices the scheduler needs.
#[derive(Debug)]
pub struct State {
    edges: Vec<Edge>,
    /// Output path → the edge producing it.
    producer: HashMap<String, EdgeId>,
    /// Input path → the edges consuming it.
    consumers: HashMap<String, Vec<EdgeId>>,
    defaults: Vec<String>,
}

impl State {
    /// Build the graph state from a parsed manifest.
    ///
    /// Fails if two edges declare the same output.
    pub fn from_manifest(manifest: BuildManifest) -> Result<Self> {
        let mut edges = Vec::with_capacity(manifest.edges.len());
        let mut producer = HashMap::new();
        let mut consumers: HashMap<String, Vec<EdgeId>> = HashMap::new();

        for (id, edge) in manifest.edges.into_iter().enumerate() {
            for output in &edge.outputs {
                if producer.insert(output.clone(), id).is_some() {
                    return Err(Error::DuplicateOutput(output.clone()));
                }
            }
            for input in &edge.inputs {
                consumers.entry(input.clone()).or_default().push(id);
            }
            edges.push(Edge {
                id,
                outputs: edge.outputs,
                inputs: edge.inputs,
                command: edge.command,
                rspfile: edge.rspfile,
                rspfile_content: edge.rspfile_content,
                use_console: edge.use_console,
            });
        }

        Ok(Self {
            edges,
            producer,
            consumers,
            defaults: manifest.defaults,
        })
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id]
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// The edge producing `path`, if any. Paths without a producer are
    /// source files.
    pub fn producer(&self, path: &str) -> Option<EdgeId> {
        self.producer.get(path).copied()
    }

    /// Edges consuming `path` as an input.
    pub fn consumers(&self, path: &str) -> &[EdgeId] {
        self.consumers.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Validates a requested target path.
    pub fn collect_target(&self, path: &str) -> Result<String> {
        if self.producer.contains_key(path) {
            Ok(path.to_string())
        } else {
            Err(Error::UnknownTarget(path.to_string()))
        }
    }

    /// Targets built when none are requested: the manifest's `defaults`, or
    /// every output no other edge consumes.
    pub fn default_nodes(&self) -> Result<Vec<String>> {
        if !self.defaults.is_empty() {
            return self
                .defaults
                .iter()
                .map(|path| self.collect_target(path))
                .collect();
        }
        let mut roots = Vec::new();
        for edge in &self.edges {
            for output in &edge.outputs {
                if self.consumers(output).is_empty() {
                    roots.push(output.clone());
                }
            }
        }
        Ok(roots)
    }
}
