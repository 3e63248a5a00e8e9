//! Error types for the swarmscan core library.
//!
//! This module defines all error types that can occur while building,
//! saving, loading and querying scan containers.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in swarmscan core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The container already holds as many objects as it may.
    #[error("Container full: capacity of {capacity} reached")]
    ContainerFull {
        /// Maximum number of objects the container accepts
        capacity: u32,
    },

    /// A container was written but the file on disk is empty.
    #[error("Container file {0} was written with 0 bytes")]
    ZeroSizedContainer(PathBuf),

    /// A container was written but the file's mtime predates the save.
    #[error("Container file {path} was not modified by the save (mtime {mtime}s < start {started}s)")]
    ModifiedTime {
        /// The file that was written
        path: PathBuf,
        /// Modification time found on disk, seconds since the epoch
        mtime: u64,
        /// When the save started, seconds since the epoch
        started: u64,
    },

    /// The container file could not be parsed.
    #[error("Invalid container: {0}")]
    InvalidContainer(String),

    /// A tainted scan was consulted for its verdict or signature info.
    #[error("Attempted to use a tainted scan")]
    TaintedScan,

    /// Operation that has no meaning for this artifact.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for CoreError {
    fn from(err: bincode::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

/// Result type alias for swarmscan core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
