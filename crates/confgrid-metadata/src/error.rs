//! Error types for metadata store access.

use thiserror::Error;

use confgrid_core::http::HttpError;

/// Result type alias for metadata operations.
pub type MetadataResult<T> = Result<T, MetadataError>;

/// Errors that can occur while talking to the metadata store.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata store unreachable: {0}")]
    Http(#[from] HttpError),

    #[error("metadata store returned {status} for {key}: {body}")]
    Status { key: String, status: u16, body: String },

    #[error("version key {key} holds a non-numeric value: {value:?}")]
    MalformedVersion { key: String, value: String },

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("version key {key} changed concurrently (expected modify index {index})")]
    CasConflict { key: String, index: u64 },

    #[error("metadata store unavailable: {0}")]
    Unavailable(String),
}
