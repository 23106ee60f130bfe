//! # Updater state machine
//!
//! Serializes Poll → Fetch → Apply against a [`TreeStore`] and publishes
//! every state change to subscribers.
//!
//! ```text
//!            ┌──────────── poll ok, nothing new ─────────────┐
//!            ▼                                               │
//!  None ─► Ready ─poll─► Polling ─► UpdateAvailable ─fetch─► Fetching
//!            ▲             │                                  │
//!            │             ▼                                  ▼
//!          poll ◄──────── Error ◄───────────────────────── UpdateReady
//!                                                             │ apply
//!                                   UpdateApplied ◄── ApplyingUpdate
//! ```
//!
//! Every operation validates the current state and moves to its in-progress
//! state inside one critical section, then runs the tree store work on a
//! spawned task. Callers get a [`PendingOperation`] they can await or drop.

mod error;

pub use error::{Result, UpdaterError};

use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use osupdate_ipc::{error_name, Properties, UpdateInfo, UpdateOperation, UpdateOrigin, UpdateState};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, instrument, warn};

use crate::tree_store::{self, BootedDeployment, PollSource, TreeStore, TreeStoreError};

/// Buffered notifications per subscriber before it starts lagging.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Error recorded when the daemon entered the `Error` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedError {
    pub name: String,
    pub message: String,
}

/// The update state machine.
pub struct Updater {
    store: Arc<dyn TreeStore>,
    live_boot: bool,
    inner: Mutex<Inner>,
    events: broadcast::Sender<Properties>,
}

struct Inner {
    state: UpdateState,
    error: Option<RecordedError>,
    update: Option<UpdateInfo>,
    booted: Option<BootedDeployment>,
}

/// What a poll should look at.
enum PollTarget {
    Remote(Option<String>),
    Volume(PathBuf),
}

/// Data captured when an operation starts.
struct Started {
    update: Option<UpdateInfo>,
    booted: Option<BootedDeployment>,
}

impl Updater {
    pub fn new(store: Arc<dyn TreeStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            live_boot: false,
            inner: Mutex::new(Inner {
                state: UpdateState::None,
                error: None,
                update: None,
                booted: None,
            }),
            events,
        }
    }

    /// Reject every operation with `LiveBoot`.
    pub fn with_live_boot(mut self, live_boot: bool) -> Self {
        self.live_boot = live_boot;
        self
    }

    /// Leave the `None` state by inspecting the booted deployment.
    #[instrument(skip(self), fields(store = self.store.name()))]
    pub async fn init(&self) {
        if self.live_boot {
            warn!("Running from a live medium, updates are disabled");
            let mut inner = self.lock();
            inner.error = Some(RecordedError {
                name: error_name::LIVE_BOOT.to_string(),
                message: UpdaterError::LiveBoot.to_string(),
            });
            self.transition(&mut inner, UpdateState::Error);
            return;
        }

        let result = self.store.booted().await;
        let mut inner = self.lock();
        match result {
            Ok(booted) => {
                info!(
                    checksum = %booted.checksum,
                    refspec = %booted.refspec,
                    "Found booted deployment"
                );
                inner.booted = Some(booted);
                self.transition(&mut inner, UpdateState::Ready);
            }
            Err(e) => self.fail(&mut inner, &e),
        }
    }

    pub fn current_state(&self) -> UpdateState {
        self.lock().state
    }

    /// The recorded error, only while in the `Error` state.
    pub fn current_error(&self) -> Option<RecordedError> {
        let inner = self.lock();
        if inner.state == UpdateState::Error {
            inner.error.clone()
        } else {
            None
        }
    }

    pub fn update_info(&self) -> Option<UpdateInfo> {
        self.lock().update.clone()
    }

    pub fn booted(&self) -> Option<BootedDeployment> {
        self.lock().booted.clone()
    }

    pub fn properties(&self) -> Properties {
        self.lock().properties()
    }

    /// Current snapshot plus a receiver for every later change.
    ///
    /// Both are taken under the same lock, so no transition falls between
    /// the snapshot and the first notification.
    pub fn subscribe(&self) -> (Properties, broadcast::Receiver<Properties>) {
        let inner = self.lock();
        (inner.properties(), self.events.subscribe())
    }

    /// Check the remote for an update. `refspec` overrides the booted
    /// deployment's refspec when non-empty.
    pub fn poll(self: &Arc<Self>, refspec: Option<String>) -> Result<PendingOperation> {
        let started = self.begin(UpdateOperation::Poll)?;
        let target = PollTarget::Remote(refspec.filter(|r| !r.is_empty()));
        let updater = Arc::clone(self);
        Ok(self.spawn(UpdateOperation::Poll, async move {
            updater.run_poll(started.booted, target).await
        }))
    }

    /// Check a repository on removable media mounted at `path`.
    pub fn poll_volume(self: &Arc<Self>, path: PathBuf) -> Result<PendingOperation> {
        let started = self.begin(UpdateOperation::PollFromVolume)?;
        let updater = Arc::clone(self);
        Ok(self.spawn(UpdateOperation::PollFromVolume, async move {
            updater.run_poll(started.booted, PollTarget::Volume(path)).await
        }))
    }

    pub fn fetch(self: &Arc<Self>) -> Result<PendingOperation> {
        let started = self.begin(UpdateOperation::Fetch)?;
        let updater = Arc::clone(self);
        Ok(self.spawn(UpdateOperation::Fetch, async move {
            let update = started.update.ok_or(UpdaterError::Abandoned)?;
            let result = updater.store.fetch(&update).await;

            let mut inner = updater.lock();
            match result {
                Ok(()) => {
                    updater.transition(&mut inner, UpdateState::UpdateReady);
                    Ok(())
                }
                Err(e) => {
                    updater.fail(&mut inner, &e);
                    Err(e.into())
                }
            }
        }))
    }

    pub fn apply(self: &Arc<Self>) -> Result<PendingOperation> {
        let started = self.begin(UpdateOperation::Apply)?;
        let updater = Arc::clone(self);
        Ok(self.spawn(UpdateOperation::Apply, async move {
            let update = started.update.ok_or(UpdaterError::Abandoned)?;
            let result = updater.store.apply(&update).await;

            let mut inner = updater.lock();
            match result {
                Ok(()) => {
                    inner.update = None;
                    updater.transition(&mut inner, UpdateState::UpdateApplied);
                    Ok(())
                }
                Err(e) => {
                    updater.fail(&mut inner, &e);
                    Err(e.into())
                }
            }
        }))
    }

    /// Validate `operation` against the current state and mark it in
    /// progress.
    fn begin(&self, operation: UpdateOperation) -> Result<Started> {
        let mut inner = self.lock();

        if self.live_boot {
            return Err(UpdaterError::LiveBoot);
        }
        if inner.state.is_in_progress() {
            return Err(UpdaterError::Busy {
                operation,
                state: inner.state,
            });
        }

        let allowed = match operation {
            UpdateOperation::Poll | UpdateOperation::PollFromVolume => {
                matches!(inner.state, UpdateState::Ready | UpdateState::Error)
            }
            UpdateOperation::Fetch => {
                inner.state == UpdateState::UpdateAvailable && inner.update.is_some()
            }
            UpdateOperation::Apply => {
                inner.state == UpdateState::UpdateReady && inner.update.is_some()
            }
        };
        if !allowed {
            return Err(UpdaterError::WrongState {
                operation,
                state: inner.state,
            });
        }

        let started = Started {
            update: inner.update.clone(),
            booted: inner.booted.clone(),
        };
        self.transition(&mut inner, operation.in_progress_state());
        Ok(started)
    }

    fn spawn<F>(&self, operation: UpdateOperation, work: F) -> PendingOperation
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        tokio::spawn(async move {
            let result = work.await;
            match &result {
                Ok(()) => debug!(%operation, "Operation finished"),
                Err(e) => warn!(%operation, error = %e, "Operation failed"),
            }
            let _ = sender.send(result);
        });
        PendingOperation {
            operation,
            receiver,
        }
    }

    async fn run_poll(&self, booted: Option<BootedDeployment>, target: PollTarget) -> Result<()> {
        let result = self.poll_store(booted, target).await;

        let mut inner = self.lock();
        match result {
            Ok((booted, update)) => {
                inner.booted = Some(booted);
                inner.error = None;
                let next = if update.is_some() {
                    UpdateState::UpdateAvailable
                } else {
                    UpdateState::Ready
                };
                inner.update = update;
                self.transition(&mut inner, next);
                Ok(())
            }
            Err(e) => {
                self.fail(&mut inner, &e);
                Err(e.into())
            }
        }
    }

    async fn poll_store(
        &self,
        booted: Option<BootedDeployment>,
        target: PollTarget,
    ) -> tree_store::Result<(BootedDeployment, Option<UpdateInfo>)> {
        // Bootstrap may have failed; retry it so a poll can recover.
        let booted = match booted {
            Some(booted) => booted,
            None => self.store.booted().await?,
        };

        let (source, origin) = match target {
            PollTarget::Remote(refspec) => (
                PollSource::Remote {
                    refspec: refspec.unwrap_or_else(|| booted.refspec.clone()),
                },
                UpdateOrigin::Remote,
            ),
            PollTarget::Volume(path) => (
                PollSource::Volume {
                    path: path.clone(),
                    refspec: booted.refspec.clone(),
                },
                UpdateOrigin::Volume { path },
            ),
        };

        let update = self
            .store
            .poll(&source, &booted.checksum)
            .await?
            .map(|found| UpdateInfo {
                checksum: found.checksum,
                refspec: found.refspec,
                original_refspec: booted.refspec.clone(),
                origin,
                metadata: found.metadata,
            });

        Ok((booted, update))
    }

    /// Record `error` and enter the `Error` state.
    fn fail(&self, inner: &mut Inner, error: &TreeStoreError) {
        warn!(error_name = error.error_name(), error = %error, "Entering error state");
        inner.error = Some(RecordedError {
            name: error.error_name().to_string(),
            message: error.to_string(),
        });
        inner.update = None;
        self.transition(inner, UpdateState::Error);
    }

    /// Move to `state` and notify subscribers. No-op when unchanged.
    fn transition(&self, inner: &mut Inner, state: UpdateState) -> bool {
        if inner.state == state {
            return false;
        }

        let previous = std::mem::replace(&mut inner.state, state);
        info!(previous = %previous, state = %state, "Updater state changed");

        // No receivers is fine.
        let _ = self.events.send(inner.properties());
        true
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    fn properties(&self) -> Properties {
        let mut properties = Properties::new(self.state);

        if self.state == UpdateState::Error {
            if let Some(error) = &self.error {
                properties.error_name = error.name.clone();
                properties.error_message = error.message.clone();
            }
        }
        if let Some(booted) = &self.booted {
            properties.current_id = booted.checksum.clone();
        }
        if let Some(update) = &self.update {
            properties.update_id = update.checksum.clone();
            properties.update_refspec = update.refspec.clone();
            properties.original_refspec = update.original_refspec.clone();
            properties.update_origin = Some(update.origin.clone());
            properties.update_version = update.metadata.version.clone().unwrap_or_default();
            properties.update_message = update.metadata.subject.clone();
            properties.download_size = update.metadata.download_size;
            properties.unpacked_size = update.metadata.unpacked_size;
        }

        properties
    }
}

/// Handle to an operation running in the background.
///
/// Dropping it does not cancel the operation.
#[derive(Debug)]
pub struct PendingOperation {
    operation: UpdateOperation,
    receiver: oneshot::Receiver<Result<()>>,
}

impl PendingOperation {
    pub fn operation(&self) -> UpdateOperation {
        self.operation
    }

    /// Wait for the operation to finish.
    pub async fn wait(self) -> Result<()> {
        self.receiver
            .await
            .unwrap_or_else(|_| Err(UpdaterError::Abandoned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree_store::{MockCommit, MockOp, MockTreeStore};
    use osupdate_ipc::CommitMetadata;

    const UPDATE_CHECKSUM: &str = "beefbeefbeefbeefbeefbeefbeefbeefbeefbeefbeefbeefbeefbeefbeefbeef";

    fn update_commit() -> MockCommit {
        MockCommit {
            checksum: UPDATE_CHECKSUM.to_string(),
            metadata: CommitMetadata {
                version: Some("6.0.1".to_string()),
                subject: "Release 6.0.1".to_string(),
                timestamp: 1_710_000_000,
                download_size: 4096,
                unpacked_size: 8192,
            },
        }
    }

    async fn setup() -> (Arc<MockTreeStore>, Arc<Updater>, BootedDeployment) {
        let store = Arc::new(MockTreeStore::new());
        let booted = store.booted().await.unwrap();
        let updater = Arc::new(Updater::new(store.clone()));
        updater.init().await;
        (store, updater, booted)
    }

    fn drain(rx: &mut broadcast::Receiver<Properties>) -> Vec<UpdateState> {
        let mut states = Vec::new();
        while let Ok(properties) = rx.try_recv() {
            states.push(properties.state);
        }
        states
    }

    #[tokio::test]
    async fn test_init_ready() {
        let (_store, updater, booted) = setup().await;
        assert_eq!(updater.current_state(), UpdateState::Ready);
        assert_eq!(updater.properties().current_id, booted.checksum);
        assert!(updater.current_error().is_none());
    }

    #[tokio::test]
    async fn test_init_not_ostree_system() {
        let updater = Updater::new(Arc::new(MockTreeStore::not_ostree()));
        updater.init().await;

        assert_eq!(updater.current_state(), UpdateState::Error);
        let error = updater.current_error().unwrap();
        assert_eq!(error.name, error_name::NOT_OSTREE_SYSTEM);
        assert_eq!(updater.properties().error_name, error_name::NOT_OSTREE_SYSTEM);
    }

    #[tokio::test]
    async fn test_full_update_cycle() {
        let (store, updater, booted) = setup().await;
        store.publish(&booted.refspec, update_commit());

        let pending = updater.poll(None).unwrap();
        assert_eq!(updater.current_state(), UpdateState::Polling);
        pending.wait().await.unwrap();
        assert_eq!(updater.current_state(), UpdateState::UpdateAvailable);

        let properties = updater.properties();
        assert_eq!(properties.update_id, UPDATE_CHECKSUM);
        assert_eq!(properties.update_refspec, booted.refspec);
        assert_eq!(properties.original_refspec, booted.refspec);
        assert_eq!(properties.update_version, "6.0.1");
        assert_eq!(properties.download_size, 4096);
        assert_eq!(properties.update_origin, Some(UpdateOrigin::Remote));

        let pending = updater.fetch().unwrap();
        assert_eq!(updater.current_state(), UpdateState::Fetching);
        pending.wait().await.unwrap();
        assert_eq!(updater.current_state(), UpdateState::UpdateReady);

        let pending = updater.apply().unwrap();
        assert_eq!(updater.current_state(), UpdateState::ApplyingUpdate);
        pending.wait().await.unwrap();
        assert_eq!(updater.current_state(), UpdateState::UpdateApplied);

        assert!(updater.update_info().is_none());
        assert_eq!(store.deployed().as_deref(), Some(UPDATE_CHECKSUM));
    }

    #[tokio::test]
    async fn test_poll_without_update_returns_to_ready() {
        let (_store, updater, _) = setup().await;

        updater.poll(None).unwrap().wait().await.unwrap();
        assert_eq!(updater.current_state(), UpdateState::Ready);
        assert!(updater.update_info().is_none());
    }

    #[tokio::test]
    async fn test_wrong_state_does_not_transition() {
        let (store, updater, booted) = setup().await;

        let err = updater.fetch().unwrap_err();
        assert!(matches!(
            err,
            UpdaterError::WrongState {
                operation: UpdateOperation::Fetch,
                state: UpdateState::Ready
            }
        ));
        assert_eq!(err.error_name(), error_name::WRONG_STATE);
        assert!(err.is_usage_error());
        assert_eq!(updater.current_state(), UpdateState::Ready);

        store.publish(&booted.refspec, update_commit());
        updater.poll(None).unwrap().wait().await.unwrap();

        assert!(matches!(updater.apply(), Err(UpdaterError::WrongState { .. })));
        assert!(matches!(updater.poll(None), Err(UpdaterError::WrongState { .. })));
        assert_eq!(updater.current_state(), UpdateState::UpdateAvailable);
        assert_eq!(store.calls(), vec![MockOp::Booted, MockOp::Booted, MockOp::Poll]);
    }

    #[tokio::test]
    async fn test_busy_while_in_flight() {
        let (_store, updater, _) = setup().await;

        let pending = updater.poll(None).unwrap();
        let err = updater.poll(None).unwrap_err();
        assert!(matches!(err, UpdaterError::Busy { .. }));
        assert_eq!(err.error_name(), error_name::BUSY);
        assert!(matches!(updater.fetch(), Err(UpdaterError::Busy { .. })));
        assert_eq!(updater.current_state(), UpdateState::Polling);

        pending.wait().await.unwrap();
        assert_eq!(updater.current_state(), UpdateState::Ready);
    }

    #[tokio::test]
    async fn test_error_is_sticky_until_poll() {
        let (store, updater, booted) = setup().await;
        store.publish(&booted.refspec, update_commit());
        store.fail(MockOp::Fetch, "connection reset");

        updater.poll(None).unwrap().wait().await.unwrap();
        let err = updater.fetch().unwrap().wait().await.unwrap_err();
        assert_eq!(err.error_name(), error_name::FETCHING);

        assert_eq!(updater.current_state(), UpdateState::Error);
        assert!(updater.update_info().is_none());
        let error = updater.current_error().unwrap();
        assert_eq!(error.name, error_name::FETCHING);
        assert!(error.message.contains("connection reset"));

        assert!(matches!(updater.fetch(), Err(UpdaterError::WrongState { .. })));
        assert!(matches!(updater.apply(), Err(UpdaterError::WrongState { .. })));
        assert_eq!(updater.current_state(), UpdateState::Error);

        store.clear_failure(MockOp::Fetch);
        updater.poll(None).unwrap().wait().await.unwrap();
        assert_eq!(updater.current_state(), UpdateState::UpdateAvailable);
        assert!(updater.current_error().is_none());
        assert!(updater.properties().error_name.is_empty());
    }

    #[tokio::test]
    async fn test_poll_recovers_from_failed_bootstrap() {
        let store = Arc::new(MockTreeStore::new());
        store.fail(MockOp::Booted, "origin file unreadable");
        let updater = Arc::new(Updater::new(store.clone()));
        updater.init().await;
        assert_eq!(
            updater.current_error().unwrap().name,
            error_name::WRONG_CONFIGURATION
        );

        store.clear_failure(MockOp::Booted);
        updater.poll(None).unwrap().wait().await.unwrap();
        assert_eq!(updater.current_state(), UpdateState::Ready);
        assert!(!updater.properties().current_id.is_empty());
    }

    #[tokio::test]
    async fn test_notifications_in_order() {
        let (store, updater, booted) = setup().await;
        store.publish(&booted.refspec, update_commit());
        let (snapshot, mut rx) = updater.subscribe();
        assert_eq!(snapshot.state, UpdateState::Ready);

        updater.poll(None).unwrap().wait().await.unwrap();
        updater.fetch().unwrap().wait().await.unwrap();
        updater.apply().unwrap().wait().await.unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![
                UpdateState::Polling,
                UpdateState::UpdateAvailable,
                UpdateState::Fetching,
                UpdateState::UpdateReady,
                UpdateState::ApplyingUpdate,
                UpdateState::UpdateApplied,
            ]
        );
    }

    #[tokio::test]
    async fn test_equal_state_is_not_published() {
        let (_store, updater, _) = setup().await;
        let (_, mut rx) = updater.subscribe();

        {
            let mut inner = updater.lock();
            assert!(!updater.transition(&mut inner, UpdateState::Ready));
        }
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_live_boot_rejects_everything() {
        let store = Arc::new(MockTreeStore::new());
        let updater = Arc::new(Updater::new(store.clone()).with_live_boot(true));
        updater.init().await;

        assert_eq!(updater.current_state(), UpdateState::Error);
        assert_eq!(updater.current_error().unwrap().name, error_name::LIVE_BOOT);

        let err = updater.poll(None).unwrap_err();
        assert!(matches!(err, UpdaterError::LiveBoot));
        assert!(matches!(
            updater.poll_volume(PathBuf::from("/media/usb")),
            Err(UpdaterError::LiveBoot)
        ));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_poll_volume_and_refspec_override() {
        let (store, updater, booted) = setup().await;
        store.publish_on_volume("/media/usb", update_commit());

        updater
            .poll_volume(PathBuf::from("/media/usb"))
            .unwrap()
            .wait()
            .await
            .unwrap();
        let info = updater.update_info().unwrap();
        assert_eq!(
            info.origin,
            UpdateOrigin::Volume {
                path: PathBuf::from("/media/usb")
            }
        );

        let other = Arc::new(Updater::new(store.clone()));
        other.init().await;
        store.publish("origin:os/osupdate/x86_64/beta", update_commit());
        other
            .poll(Some("origin:os/osupdate/x86_64/beta".to_string()))
            .unwrap()
            .wait()
            .await
            .unwrap();
        let info = other.update_info().unwrap();
        assert_eq!(info.refspec, "origin:os/osupdate/x86_64/beta");
        assert_eq!(info.original_refspec, booted.refspec);

        // Instances do not share state.
        assert_eq!(updater.current_state(), UpdateState::UpdateAvailable);
        other.fetch().unwrap().wait().await.unwrap();
        assert_eq!(updater.current_state(), UpdateState::UpdateAvailable);
        assert_eq!(other.current_state(), UpdateState::UpdateReady);
    }
}
