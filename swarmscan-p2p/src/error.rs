//! Error types for swarmscan peer operations.

use swarmscan_core::CoreError;
use thiserror::Error;

/// Errors that can occur while exchanging containers and scans with peers.
#[derive(Debug, Error)]
pub enum P2pError {
    /// Error from a container primitive.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Network transport error.
    #[error("Network error: {0}")]
    Network(String),

    /// Protocol encoding/decoding error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The named peer has no record in the store.
    #[error("Peer not known: {0}")]
    PeerNotKnown(String),

    /// A scan result arrived for a request we never sent.
    #[error("No such request: {0}")]
    NoSuchRequest(String),

    /// A record the operation depends on is missing from the store.
    #[error("Store error: {0}")]
    Store(String),

    /// Request timed out.
    #[error("Request timed out")]
    Timeout,

    /// Decision policy name not in the registry.
    #[error("Unknown decision handler: {0}")]
    UnknownPolicy(String),

    /// Scan handler name not in the registry.
    #[error("Unknown scan handler: {0}")]
    UnknownScanner(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for P2pError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            P2pError::Timeout
        } else {
            P2pError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for P2pError {
    fn from(err: serde_json::Error) -> Self {
        P2pError::Protocol(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for P2pError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        P2pError::Timeout
    }
}

/// Result type alias for peer operations.
pub type Result<T> = std::result::Result<T, P2pError>;
