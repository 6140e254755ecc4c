//! Error types for the tailing agent.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for tailing, dispatch and persistence operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors not tied to a more specific operation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The watched directory could not be listed.
    #[error("Cannot list directory {path}: {source}")]
    Discovery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A tracked file could not be opened or read.
    #[error("Stream error on {path}: {message}")]
    Stream { path: PathBuf, message: String },

    /// The file shrank below the position the stream had reached.
    #[error("File {path} truncated to {size} bytes below offset {offset}")]
    Truncated { path: PathBuf, size: u64, offset: u64 },

    /// A line classified as a complete record did not parse.
    #[error("Malformed record in {file_id}: {message}")]
    MalformedRecord { file_id: String, message: String },

    /// A pipeline stage rejected or failed on an entry.
    #[error("Pipeline stage '{stage}' failed: {message}")]
    Pipeline { stage: String, message: String },

    /// The position file could not be read or written.
    #[error("Position file {path}: {message}")]
    PositionStore { path: PathBuf, message: String },

    /// Invalid agent configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// A convenient Result type for agent operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn stream(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Error::Stream {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn position_store(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Error::PositionStore {
            path: path.into(),
            message: err.to_string(),
        }
    }
}
