//! Autoupdater against a real daemon on a temporary socket.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use osupdate_autoupdater::autoupdate::{self, ExitStatus, RunOptions};
use osupdate_autoupdater::config::AutoupdateConfig;
use osupdate_autoupdater::connectivity::FixedConnectivity;
use osupdate_autoupdater::control_loop::DaemonProxy;
use osupdate_autoupdater::schedule::{ScheduleStore, StampFile, SECS_PER_DAY};
use osupdate_daemon::{IpcServer, MockCommit, MockOp, MockTreeStore, TreeStore, Updater};
use osupdate_ipc::{CommitMetadata, UpdateState, UpdateStep, UpdaterClient};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

const UPDATE_CHECKSUM: &str = "5e1f0c3a9b7d2e4f6a8c0b1d3e5f7a9c2b4d6e8f0a1c3e5b7d9f2a4c6e8b0d1f";

const ONLINE: FixedConnectivity = FixedConnectivity {
    online: true,
    metered: false,
};

struct Harness {
    _dir: TempDir,
    store: Arc<MockTreeStore>,
    updater: Arc<Updater>,
    socket: PathBuf,
    stamp: StampFile,
}

impl Harness {
    async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MockTreeStore::new());
        let updater = Arc::new(Updater::new(store.clone()));
        updater.init().await;

        let socket = dir.path().join("updater.sock");
        let server = IpcServer::bind(&socket, updater.clone()).await.unwrap();
        tokio::spawn(async move { server.run().await });

        let stamp = StampFile::new(dir.path().join("stamp"));
        stamp
            .write(SystemTime::now() - Duration::from_secs(30 * SECS_PER_DAY))
            .unwrap();

        Self {
            _dir: dir,
            store,
            updater,
            socket,
            stamp,
        }
    }

    async fn publish_update(&self) {
        let booted = self.store.booted().await.unwrap();
        self.store.publish(
            &booted.refspec,
            MockCommit {
                checksum: UPDATE_CHECKSUM.to_string(),
                metadata: CommitMetadata {
                    version: Some("6.1.0".to_string()),
                    subject: "Weekly update".to_string(),
                    timestamp: 1_700_600_000,
                    download_size: 4096,
                    unpacked_size: 8192,
                },
            },
        );
    }

    async fn run(&self, last_step: UpdateStep) -> ExitStatus {
        let config = AutoupdateConfig {
            last_automatic_step: last_step,
            interval_days: 7,
            randomized_delay_days: 0,
            update_on_mobile: false,
        };
        let client = UpdaterClient::new(&self.socket).with_timeout(Duration::from_secs(5));
        let mut rng = StdRng::seed_from_u64(3);
        let options = RunOptions::default();

        let run = autoupdate::run(
            &options,
            &config,
            &ONLINE,
            &self.stamp,
            &mut rng,
            || DaemonProxy::connect(client),
        );
        tokio::time::timeout(Duration::from_secs(30), run).await.unwrap()
    }

    fn stamp_is_fresh(&self) -> bool {
        let stamp = self.stamp.read().unwrap().unwrap();
        SystemTime::now()
            .duration_since(stamp)
            .map(|age| age < Duration::from_secs(SECS_PER_DAY))
            .unwrap_or(true)
    }
}

#[tokio::test]
async fn test_applies_published_update() {
    let harness = Harness::start().await;
    harness.publish_update().await;

    assert_eq!(harness.run(UpdateStep::Apply).await, ExitStatus::Ok);
    assert_eq!(harness.updater.current_state(), UpdateState::UpdateApplied);
    assert_eq!(harness.store.deployed().as_deref(), Some(UPDATE_CHECKSUM));
    assert!(harness.stamp_is_fresh());
}

#[tokio::test]
async fn test_stops_at_configured_step() {
    let harness = Harness::start().await;
    harness.publish_update().await;

    assert_eq!(harness.run(UpdateStep::Fetch).await, ExitStatus::Ok);
    assert_eq!(harness.updater.current_state(), UpdateState::UpdateReady);
    assert!(harness.store.is_fetched(UPDATE_CHECKSUM));
    assert_eq!(harness.store.deployed(), None);
    assert!(!harness.store.calls().contains(&MockOp::Apply));
}

#[tokio::test]
async fn test_no_update_is_success() {
    let harness = Harness::start().await;

    assert_eq!(harness.run(UpdateStep::Apply).await, ExitStatus::Ok);
    assert_eq!(harness.updater.current_state(), UpdateState::Ready);
    assert_eq!(
        harness.store.calls().iter().filter(|op| **op == MockOp::Poll).count(),
        1
    );
}

#[tokio::test]
async fn test_fetch_failure_keeps_stamp() {
    let harness = Harness::start().await;
    harness.publish_update().await;
    harness.store.fail(MockOp::Fetch, "network unreachable");
    let before = harness.stamp.read().unwrap();

    assert_eq!(harness.run(UpdateStep::Apply).await, ExitStatus::Failed);
    assert_eq!(harness.updater.current_state(), UpdateState::Error);
    assert_eq!(harness.stamp.read().unwrap(), before);
}

#[tokio::test]
async fn test_missing_daemon_fails() {
    let dir = TempDir::new().unwrap();
    let stamp = StampFile::new(dir.path());
    stamp
        .write(SystemTime::now() - Duration::from_secs(30 * SECS_PER_DAY))
        .unwrap();
    let config = AutoupdateConfig {
        last_automatic_step: UpdateStep::Apply,
        interval_days: 7,
        randomized_delay_days: 0,
        update_on_mobile: false,
    };
    let client = UpdaterClient::new(dir.path().join("absent.sock")).with_timeout(Duration::from_secs(1));

    let status = autoupdate::run(
        &RunOptions {
            force_update: true,
            from_volume: None,
        },
        &config,
        &ONLINE,
        &stamp,
        &mut StdRng::seed_from_u64(3),
        || DaemonProxy::connect(client),
    )
    .await;

    assert_eq!(status, ExitStatus::Failed);
}
