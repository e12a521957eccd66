//! Error types for link metadata, keys and signatures.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors from metadata container and key operations
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("canonical JSON error: {0}")]
    Canonicalization(String),

    /// The value is not a usable key of the required kind
    #[error("invalid key format: {0}")]
    KeyFormat(String),

    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("gpg error: {0}")]
    Gpg(String),
}

impl MetadataError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for metadata operations
pub type MetadataResult<T> = Result<T, MetadataError>;
