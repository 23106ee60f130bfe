//! Errors returned by updater operations.

use osupdate_ipc::{error_name, UpdateOperation, UpdateState};
use thiserror::Error;

use crate::tree_store::TreeStoreError;

/// Errors from starting or completing an updater operation.
///
/// Usage errors (`WrongState`, `Busy`, `LiveBoot`) are returned before any
/// transition happens. Tree store errors come back through the pending
/// operation after the daemon has moved to `Error`.
#[derive(Error, Debug)]
pub enum UpdaterError {
    #[error("Can't call {operation} while in the {state} state")]
    WrongState {
        operation: UpdateOperation,
        state: UpdateState,
    },

    #[error("Can't call {operation} while another operation is in progress ({state})")]
    Busy {
        operation: UpdateOperation,
        state: UpdateState,
    },

    #[error("Updates are disabled when running from a live medium")]
    LiveBoot,

    #[error(transparent)]
    TreeStore(#[from] TreeStoreError),

    /// The operation task ended without reporting back.
    #[error("Operation was abandoned")]
    Abandoned,
}

impl UpdaterError {
    /// Fully-qualified name used in error replies and in `Properties`.
    pub fn error_name(&self) -> &'static str {
        match self {
            UpdaterError::WrongState { .. } => error_name::WRONG_STATE,
            UpdaterError::Busy { .. } => error_name::BUSY,
            UpdaterError::LiveBoot => error_name::LIVE_BOOT,
            UpdaterError::TreeStore(e) => e.error_name(),
            UpdaterError::Abandoned => error_name::FAILED,
        }
    }

    /// True for errors that reject a call without changing state.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            UpdaterError::WrongState { .. } | UpdaterError::Busy { .. } | UpdaterError::LiveBoot
        )
    }
}

/// Result type alias for updater operations.
pub type Result<T> = std::result::Result<T, UpdaterError>;
