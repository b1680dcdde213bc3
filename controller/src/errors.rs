//! Error types for the node controller
//!
//! Errors are `Clone` so a single settled outcome can be handed to every
//! caller awaiting the same deferred handle. I/O sources are kept behind `Arc`.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ControllerError>;

/// Main error type for lifecycle operations
#[derive(Debug, Clone, Error)]
pub enum ControllerError {
    /// An operation needed the node runtime before `init()` completed
    #[error("Node runtime is not initialized")]
    NotInitialized,

    /// Illegal lifecycle transition
    #[error("Invalid state: {reason}")]
    InvalidState { reason: String },

    /// The controller was stopped before the awaited value was produced
    #[error("Controller stopped before {what} became available")]
    Stopped { what: &'static str },

    /// The external node runtime reported a failure
    #[error("Node runtime failed during {operation}: {reason}")]
    Runtime {
        operation: &'static str,
        reason: String,
    },

    /// Filesystem failure outside the snapshot pipeline
    #[error("Filesystem error at '{}': {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// Snapshot pipeline failure
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Snapshot pipeline error variants
#[derive(Debug, Clone, Error)]
pub enum SnapshotError {
    /// No manifest is published for the node's network
    #[error("Manifest url for the snapshots are not available for network ID {network_id}")]
    ManifestUnavailable { network_id: String },

    /// Transport failure talking to the manifest or archive endpoint
    #[error("Network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    /// The manifest response was not well-formed
    #[error("Malformed snapshot manifest from {url}: {reason}")]
    Manifest { url: String, reason: String },

    /// The snapshot was produced by a newer database schema than the node knows
    #[error("Snapshot database version {snapshot} is newer than the node database version {node}, update your node before importing")]
    IncompatibleVersion { snapshot: u32, node: u32 },

    /// Streaming the archive to disk failed
    #[error("Snapshot download failed: {reason}")]
    Download { reason: String },

    /// Downloaded bytes do not hash to the published checksum
    #[error("Snapshot checksum does not match (expected {expected})")]
    ChecksumMismatch { expected: String },

    /// The archive could not be decompressed
    #[error("Failed to decompress snapshot archive '{}': {reason}", path.display())]
    Decompress { path: PathBuf, reason: String },

    /// The database directory swap failed
    #[error("Failed to install snapshot database into '{}': {reason}", path.display())]
    Install { path: PathBuf, reason: String },

    /// Local filesystem failure while staging files
    #[error("Filesystem error at '{}': {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// The run finished without settling its result
    #[error("Snapshot run ended without a result")]
    Aborted,
}

/// Configuration error variants
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Failed to load configuration file
    #[error("Failed to load config from '{path}': {reason}")]
    LoadFailed { path: String, reason: String },

    /// Configuration parsing error
    #[error("Failed to parse config: {reason}")]
    ParseError { reason: String },

    /// Invalid configuration value
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ControllerError {
    pub fn runtime(operation: &'static str, err: anyhow::Error) -> Self {
        ControllerError::Runtime {
            operation,
            reason: format!("{:#}", err),
        }
    }

    pub fn filesystem(path: impl Into<PathBuf>, err: io::Error) -> Self {
        ControllerError::Filesystem {
            path: path.into(),
            source: Arc::new(err),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        ControllerError::InvalidState {
            reason: reason.into(),
        }
    }
}

impl SnapshotError {
    pub fn filesystem(path: impl Into<PathBuf>, err: io::Error) -> Self {
        SnapshotError::Filesystem {
            path: path.into(),
            source: Arc::new(err),
        }
    }
}
