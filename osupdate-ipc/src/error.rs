//! Error types for talking to the daemon.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors from the IPC layer.
///
/// Everything except `Remote` is a communication failure: the request may
/// never have reached the daemon.
#[derive(Error, Debug)]
pub enum IpcError {
    /// Could not connect to the daemon socket.
    #[error("Failed to connect to updater daemon at {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The call did not complete within the configured timeout.
    #[error("Call to updater daemon timed out after {0:?}")]
    Timeout(Duration),

    /// Socket I/O failed.
    #[error("Socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be encoded or decoded.
    #[error("Malformed message: {0}")]
    Decode(#[from] serde_json::Error),

    /// Frame exceeded the size limit.
    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    /// The daemon closed the connection before replying.
    #[error("Updater daemon closed the connection")]
    Closed,

    /// The daemon sent a reply that does not fit the request.
    #[error("Unexpected reply from updater daemon: {0}")]
    UnexpectedReply(String),

    /// The daemon rejected the call.
    #[error("{name}: {message}")]
    Remote { name: String, message: String },
}

/// Result type alias for IPC operations.
pub type Result<T> = std::result::Result<T, IpcError>;
