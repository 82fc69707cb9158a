//! Artifact store error types.

use thiserror::Error;

/// Result type alias for artifact operations.
pub type ArtifactResult<T> = Result<T, ArtifactError>;

/// Errors that can occur while building or reading artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("template error: {0}")]
    Template(#[from] askama::Error),

    #[error("render error: {0}")]
    Render(String),

    #[error("packaging error: {0}")]
    Package(String),

    #[error("artifact for version {0} already exists")]
    AlreadyExists(u64),
}
