//! Error handling for the transfer engine.
//!
//! Every session-handling task converts failures local to its own session
//! into a terminal `failed(reason)` status on its session record; errors are
//! returned as values and never unwind across the accept loop or into
//! sibling sessions.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, TransferError>;

/// Errors that can occur in discovery, naming, and transfer operations
#[derive(Error, Debug)]
pub enum TransferError {
    /// The mDNS daemon could not be created or a record could not be
    /// registered/browsed (e.g. multicast socket unavailable). There is no
    /// automatic retry; the caller decides whether to retry or run
    /// disconnected.
    #[error("discovery unavailable: {0}")]
    DiscoveryUnavailable(String),

    /// Connect/read/write failure, including expired timeouts.
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed length prefix or structured payload.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The receiver's acknowledgement status was not "ready".
    #[error("receiver not ready: {0}")]
    ServerNotReady(String),

    /// The receiver's digest of a file's bytes disagreed with the checksum
    /// declared in the manifest.
    #[error("checksum mismatch for {file}")]
    ChecksumMismatch { file: String },

    /// A destination folder could not be created.
    #[error("cannot create folder {path}: {source}")]
    FolderCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// I/O error (file system, sockets)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
