//! In-memory tree store for testing and development.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use osupdate_ipc::{CommitMetadata, UpdateInfo, UpdateOrigin};
use tracing::{debug, info, instrument};

use super::error::{Result, TreeStoreError};
use super::{BootedDeployment, PollResult, PollSource, TreeStore};

/// Operations recorded by the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Booted,
    Poll,
    Fetch,
    Apply,
}

/// A commit the mock can offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCommit {
    pub checksum: String,
    pub metadata: CommitMetadata,
}

/// Mock tree store.
///
/// Simulates a booted deployment, remote heads and volume repositories in
/// memory. Failures and latency can be injected per operation, and every
/// call is recorded so tests can assert on what the updater did.
pub struct MockTreeStore {
    state: RwLock<MockState>,
}

struct MockState {
    booted: Option<BootedDeployment>,
    remote_heads: HashMap<String, MockCommit>,
    volumes: HashMap<PathBuf, MockCommit>,
    fetched: HashSet<String>,
    deployed: Option<String>,
    failures: HashMap<MockOp, String>,
    latency: Duration,
    calls: Vec<MockOp>,
}

impl MockTreeStore {
    /// Create a mock booted into a default deployment with no updates
    /// published.
    pub fn new() -> Self {
        info!("Creating mock tree store");
        Self::with_booted(Some(BootedDeployment {
            checksum: "0a1b2c3d4e5f".repeat(5) + "0a1b",
            refspec: "origin:os/osupdate/x86_64/stable".to_string(),
            commit_timestamp: 1_700_000_000,
            remote_url: Some("https://updates.example.com/ostree/os".to_string()),
        }))
    }

    /// Create a mock for a system that was not booted from a tree store.
    pub fn not_ostree() -> Self {
        Self::with_booted(None)
    }

    fn with_booted(booted: Option<BootedDeployment>) -> Self {
        Self {
            state: RwLock::new(MockState {
                booted,
                remote_heads: HashMap::new(),
                volumes: HashMap::new(),
                fetched: HashSet::new(),
                deployed: None,
                failures: HashMap::new(),
                latency: Duration::ZERO,
                calls: Vec::new(),
            }),
        }
    }

    /// Publish `commit` as the head of `refspec` on the remote.
    pub fn publish(&self, refspec: &str, commit: MockCommit) {
        if let Ok(mut state) = self.state.write() {
            state.remote_heads.insert(refspec.to_string(), commit);
        }
    }

    /// Make a repository containing `commit` available at `path`.
    pub fn publish_on_volume(&self, path: impl Into<PathBuf>, commit: MockCommit) {
        if let Ok(mut state) = self.state.write() {
            state.volumes.insert(path.into(), commit);
        }
    }

    /// Make the next calls of `op` fail with `message` until cleared.
    pub fn fail(&self, op: MockOp, message: &str) {
        if let Ok(mut state) = self.state.write() {
            state.failures.insert(op, message.to_string());
        }
    }

    pub fn clear_failure(&self, op: MockOp) {
        if let Ok(mut state) = self.state.write() {
            state.failures.remove(&op);
        }
    }

    /// Delay every poll, fetch and apply by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut state) = self.state.write() {
            state.latency = latency;
        }
    }

    /// Operations called so far, in order.
    pub fn calls(&self) -> Vec<MockOp> {
        self.state.read().map(|s| s.calls.clone()).unwrap_or_default()
    }

    /// Checksum of the last deployed commit.
    pub fn deployed(&self) -> Option<String> {
        self.state.read().ok().and_then(|s| s.deployed.clone())
    }

    pub fn is_fetched(&self, checksum: &str) -> bool {
        self.state
            .read()
            .map(|s| s.fetched.contains(checksum))
            .unwrap_or(false)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MockState>> {
        self.state
            .read()
            .map_err(|_| TreeStoreError::Internal("Lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MockState>> {
        self.state
            .write()
            .map_err(|_| TreeStoreError::Internal("Lock poisoned".to_string()))
    }

    /// Record the call and return the injected failure and latency.
    fn enter(&self, op: MockOp) -> Result<(Option<String>, Duration)> {
        let mut state = self.write()?;
        state.calls.push(op);
        Ok((state.failures.get(&op).cloned(), state.latency))
    }
}

impl Default for MockTreeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TreeStore for MockTreeStore {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn booted(&self) -> Result<BootedDeployment> {
        let (failure, _) = self.enter(MockOp::Booted)?;
        if let Some(message) = failure {
            return Err(TreeStoreError::WrongConfiguration(message));
        }

        self.read()?
            .booted
            .clone()
            .ok_or_else(|| TreeStoreError::NotOstreeSystem("no booted deployment".to_string()))
    }

    #[instrument(skip(self), fields(refspec = %source.refspec()))]
    async fn poll(&self, source: &PollSource, booted_checksum: &str) -> Result<Option<PollResult>> {
        let (failure, latency) = self.enter(MockOp::Poll)?;
        tokio::time::sleep(latency).await;
        if let Some(message) = failure {
            return Err(TreeStoreError::Fetching(message));
        }

        let state = self.read()?;
        let candidate = match source {
            PollSource::Remote { refspec } => state.remote_heads.get(refspec).cloned(),
            PollSource::Volume { path, .. } => Some(
                state
                    .volumes
                    .get(path)
                    .cloned()
                    .ok_or_else(|| no_volume_repo(path))?,
            ),
        };

        match candidate {
            Some(commit) if commit.checksum != booted_checksum => {
                debug!(checksum = %commit.checksum, "Mock update available");
                Ok(Some(PollResult {
                    checksum: commit.checksum,
                    refspec: source.refspec().to_string(),
                    metadata: commit.metadata,
                }))
            }
            _ => Ok(None),
        }
    }

    #[instrument(skip(self, update), fields(checksum = %update.checksum))]
    async fn fetch(&self, update: &UpdateInfo) -> Result<()> {
        let (failure, latency) = self.enter(MockOp::Fetch)?;
        tokio::time::sleep(latency).await;
        if let Some(message) = failure {
            return Err(TreeStoreError::Fetching(message));
        }

        let mut state = self.write()?;
        if let UpdateOrigin::Volume { path } = &update.origin {
            if !state.volumes.contains_key(path) {
                return Err(no_volume_repo(path));
            }
        }
        state.fetched.insert(update.checksum.clone());
        info!("Mock fetch complete");
        Ok(())
    }

    #[instrument(skip(self, update), fields(checksum = %update.checksum))]
    async fn apply(&self, update: &UpdateInfo) -> Result<()> {
        let (failure, latency) = self.enter(MockOp::Apply)?;
        tokio::time::sleep(latency).await;
        if let Some(message) = failure {
            return Err(TreeStoreError::DeployFailed(message));
        }

        let mut state = self.write()?;
        if !state.fetched.contains(&update.checksum) {
            return Err(TreeStoreError::DeployFailed(format!(
                "commit {} has not been fetched",
                update.checksum
            )));
        }
        state.deployed = Some(update.checksum.clone());
        info!("Mock deployment written");
        Ok(())
    }
}

fn no_volume_repo(path: &Path) -> TreeStoreError {
    TreeStoreError::Fetching(format!("no repository found on {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(checksum: &str) -> MockCommit {
        MockCommit {
            checksum: checksum.to_string(),
            metadata: CommitMetadata {
                version: Some("2.0".to_string()),
                subject: "Release 2.0".to_string(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_poll_ignores_booted_commit() {
        let store = MockTreeStore::new();
        let booted = store.booted().await.unwrap();
        let source = PollSource::Remote {
            refspec: booted.refspec.clone(),
        };

        assert!(store.poll(&source, &booted.checksum).await.unwrap().is_none());

        store.publish(&booted.refspec, commit(&booted.checksum));
        assert!(store.poll(&source, &booted.checksum).await.unwrap().is_none());

        store.publish(&booted.refspec, commit("beef"));
        let found = store.poll(&source, &booted.checksum).await.unwrap().unwrap();
        assert_eq!(found.checksum, "beef");
        assert_eq!(found.metadata.version.as_deref(), Some("2.0"));
    }

    #[tokio::test]
    async fn test_apply_requires_fetch() {
        let store = MockTreeStore::new();
        let update = UpdateInfo {
            checksum: "beef".to_string(),
            refspec: "origin:main".to_string(),
            original_refspec: "origin:main".to_string(),
            origin: UpdateOrigin::Remote,
            metadata: CommitMetadata::default(),
        };

        assert!(matches!(
            store.apply(&update).await,
            Err(TreeStoreError::DeployFailed(_))
        ));

        store.fetch(&update).await.unwrap();
        store.apply(&update).await.unwrap();
        assert_eq!(store.deployed().as_deref(), Some("beef"));
        assert_eq!(
            store.calls(),
            vec![MockOp::Apply, MockOp::Fetch, MockOp::Apply]
        );
    }

    #[tokio::test]
    async fn test_not_ostree() {
        let store = MockTreeStore::not_ostree();
        let err = store.booted().await.unwrap_err();
        assert!(matches!(err, TreeStoreError::NotOstreeSystem(_)));
    }

    #[tokio::test]
    async fn test_missing_volume_repo() {
        let store = MockTreeStore::new();
        let source = PollSource::Volume {
            path: PathBuf::from("/media/empty"),
            refspec: "origin:main".to_string(),
        };
        assert!(matches!(
            store.poll(&source, "booted").await,
            Err(TreeStoreError::Fetching(_))
        ));
    }
}
