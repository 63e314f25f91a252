//! Indexer error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during indexing and query operations.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// I/O error during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tag store failure
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to tokenize file content
    #[error("Tokenize error in {path}: {message}")]
    Tokenize { path: PathBuf, message: String },

    /// The previous catalog snapshot cannot be used for an incremental run
    #[error("Full rebuild required: {0}")]
    RebuildRequired(String),

    /// The definition process could not be started
    #[error("Failed to start definition process `{program}`: {source}")]
    ProcessSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The definition process exited or closed a pipe mid-batch
    #[error("Definition process stopped while handling {path}: {message}")]
    ProcessExited { path: String, message: String },

    /// Definition line pattern could not be compiled
    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    /// Invalid `--langmap` value
    #[error("Invalid language map entry `{0}`")]
    LangMap(String),

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Path not found
    #[error("Path not found: {0}")]
    NotFound(PathBuf),
}

impl IndexerError {
    /// Whether this error came from the tag store itself.
    pub fn is_store_error(&self) -> bool {
        matches!(self, IndexerError::Database(_))
    }
}

impl From<serde_yaml::Error> for IndexerError {
    fn from(e: serde_yaml::Error) -> Self {
        IndexerError::Config(e.to_string())
    }
}
