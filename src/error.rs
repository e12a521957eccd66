//! Error taxonomy for step recording
//!
//! Every failure surfaces to the direct caller. Missing roots, dead
//! symlinks and empty root lists are not errors and never reach this type.

use std::io;
use std::path::PathBuf;

use steplink_metadata::MetadataError;
use thiserror::Error;

use crate::session::SessionPhase;

/// Errors from recording operations
#[derive(Debug, Error)]
pub enum RecordError {
    /// Malformed configuration, hash algorithm, pattern or signing key
    #[error("validation error: {0}")]
    Validation(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Identity used to stop a session does not match the one that started it
    #[error("signature verification failed: {0}")]
    SignatureVerification(String),

    #[error("failed to start `{program}`: {source}")]
    ProcessSpawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot move a recording session from {from} to {to}")]
    InvalidTransition {
        from: SessionPhase,
        to: SessionPhase,
    },

    #[error("metadata error: {0}")]
    Metadata(MetadataError),
}

impl RecordError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    pub fn is_signature_verification(&self) -> bool {
        matches!(self, Self::SignatureVerification(_))
    }
}

impl From<MetadataError> for RecordError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::KeyFormat(message) => Self::Validation(message),
            MetadataError::Io { path, source } => Self::Io { path, source },
            other => Self::Metadata(other),
        }
    }
}

/// Result type for recording operations
pub type RecordResult<T> = Result<T, RecordError>;
