//! Error types for tree store operations.

use osupdate_ipc::error_name;
use thiserror::Error;

/// Errors that can occur during tree store operations.
#[derive(Error, Debug)]
pub enum TreeStoreError {
    /// The running system was not booted from the tree store.
    #[error("Not an OSTree-based system: {0}")]
    NotOstreeSystem(String),

    /// The deployment or remote configuration is unusable.
    #[error("Invalid tree store configuration: {0}")]
    WrongConfiguration(String),

    /// Transferring objects from the source failed.
    #[error("Failed to fetch: {0}")]
    Fetching(String),

    /// Writing the new deployment failed.
    #[error("Failed to deploy: {0}")]
    DeployFailed(String),

    /// An external command exited unsuccessfully.
    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Command output could not be understood.
    #[error("Failed to parse {what}: {detail}")]
    Parse { what: &'static str, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TreeStoreError {
    /// Fully-qualified error name published when this error puts the daemon
    /// into the `Error` state.
    pub fn error_name(&self) -> &'static str {
        match self {
            TreeStoreError::NotOstreeSystem(_) => error_name::NOT_OSTREE_SYSTEM,
            TreeStoreError::WrongConfiguration(_) => error_name::WRONG_CONFIGURATION,
            TreeStoreError::Fetching(_) => error_name::FETCHING,
            _ => error_name::FAILED,
        }
    }
}

/// Result type alias for tree store operations.
pub type Result<T> = std::result::Result<T, TreeStoreError>;
