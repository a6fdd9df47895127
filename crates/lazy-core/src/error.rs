//! Error types for lazy-build.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    // Backend errors
    #[error("Object store {operation} failed for {key}: {source}")]
    ObjectStore {
        operation: &'static str,
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    // Packaging errors
    #[error("Declared output does not exist: {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("Archive error: {0}")]
    Archive(String),

    // Command errors
    #[error("Command {command:?} failed with exit code {code:?}")]
    CommandFailed {
        command: Vec<String>,
        code: Option<i32>,
    },

    // Infrastructure errors
    #[error("Failed to {operation} {}: {source}", path.display())]
    Path {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap an I/O error with the path and operation it came from.
    pub fn path(
        operation: &'static str,
        path: impl Into<PathBuf>,
    ) -> impl FnOnce(std::io::Error) -> Error {
        let path = path.into();
        move |source| Error::Path {
            operation,
            path,
            source,
        }
    }

    /// Whether this error is a local "file not found" condition.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Path { source, .. } | Error::Io(source) => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
