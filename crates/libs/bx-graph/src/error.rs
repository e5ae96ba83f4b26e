//! Error types for the BX graph engine.

/// Errors that can occur while loading or building a graph.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error("Output '{0}' is produced by more than one edge")]
    DuplicateOutput(String),

    #[error("Unknown target '{0}'")]
    UnknownTarget(String),

    #[error("Dependency cycle involving '{0}'")]
    DependencyCycle(String),

    #[error("Build interrupted")]
    Interrupted,

    #[error("Build failed: {failures} command(s) failed")]
    BuildFailed { failures: usize },
}
