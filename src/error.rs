//! Typed errors for the reconciliation engine.
//!
//! Source and configuration errors are fatal to a run. Oracle errors are
//! normally absorbed by the oracle adapters into degraded outcomes, but custom
//! [`Scorer`](crate::oracle::Scorer) implementations may surface them, in which
//! case only the affected raw row is dropped.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("File not found: {0:?}")]
    NotFound(PathBuf),

    #[error("Permission denied: {0:?}")]
    PermissionDenied(PathBuf),

    #[error("Unsupported file format '{extension}' for {path:?}")]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("Could not determine the delimiter for {0:?}")]
    UndeterminedDelimiter(PathBuf),

    #[error("File {0:?} contains no records")]
    Empty(PathBuf),

    #[error("Error reading file {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SourceError {
    pub(crate) fn corrupt(path: &std::path::Path, reason: impl ToString) -> Self {
        SourceError::Corrupt {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn from_io(path: &std::path::Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => SourceError::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => {
                SourceError::PermissionDenied(path.to_path_buf())
            }
            _ => SourceError::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Oracle returned no content")]
    EmptyResponse,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be within [0, 1], got {value}")]
    OutOfRange { name: &'static str, value: f64 },

    #[error("target correlation ({target}) must not be below the correlation threshold ({threshold})")]
    TargetBelowThreshold { threshold: f64, target: f64 },

    #[error("batch size must be at least 1")]
    ZeroBatchSize,

    #[error("snapshot interval must be at least 1")]
    ZeroSnapshotInterval,

    #[error("field rule '{0}' must name a column")]
    EmptyFieldRule(&'static str),
}
