//! Content-addressed OS tree store abstraction.
//!
//! The updater state machine never talks to the tree store directly; it goes
//! through the [`TreeStore`] trait so the real `ostree` backend can be swapped
//! for an in-memory one in tests and development setups.

mod error;
mod mock;
mod ostree;

pub use error::{Result, TreeStoreError};
pub use mock::{MockCommit, MockOp, MockTreeStore};
pub use ostree::OstreeCli;

use std::path::PathBuf;

use async_trait::async_trait;
use osupdate_ipc::{CommitMetadata, UpdateInfo};

/// The deployment the system is currently running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootedDeployment {
    /// Commit checksum of the booted tree
    pub checksum: String,
    /// Refspec the deployment was created from (`remote:ref`)
    pub refspec: String,
    /// Commit timestamp, seconds since the Unix epoch
    pub commit_timestamp: i64,
    /// URL of the remote the refspec points at, when known
    pub remote_url: Option<String>,
}

/// Where a poll looks for a newer commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollSource {
    /// The remote named in the refspec
    Remote { refspec: String },
    /// A repository exported on removable media, at `<path>/.ostree/repo`
    Volume { path: PathBuf, refspec: String },
}

impl PollSource {
    pub fn refspec(&self) -> &str {
        match self {
            PollSource::Remote { refspec } | PollSource::Volume { refspec, .. } => refspec,
        }
    }
}

/// A candidate commit found by a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResult {
    pub checksum: String,
    pub refspec: String,
    pub metadata: CommitMetadata,
}

/// Backend operations used by the updater.
///
/// Each method may take a long time (network transfers, deployment writes);
/// callers run them off the request path.
#[async_trait]
pub trait TreeStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Describe the booted deployment.
    ///
    /// Fails with [`TreeStoreError::NotOstreeSystem`] when the running system
    /// was not booted from the tree store.
    async fn booted(&self) -> Result<BootedDeployment>;

    /// Look for a commit newer than `booted_checksum`.
    ///
    /// Returns `None` when the source has nothing newer.
    async fn poll(&self, source: &PollSource, booted_checksum: &str) -> Result<Option<PollResult>>;

    /// Download the objects of a candidate commit.
    async fn fetch(&self, update: &UpdateInfo) -> Result<()>;

    /// Deploy a fetched commit so it becomes the default on next boot.
    async fn apply(&self, update: &UpdateInfo) -> Result<()>;
}

/// Split a `remote:ref` refspec. A refspec without a colon has no remote.
pub fn split_refspec(refspec: &str) -> (Option<&str>, &str) {
    match refspec.split_once(':') {
        Some((remote, reference)) => (Some(remote), reference),
        None => (None, refspec),
    }
}
