//! Quit Watch - graceful shutdown when a marker file is deleted.
//!
//! A harness creates the quit file before starting the daemon and deletes it
//! to ask the daemon to exit. The watch then asks a check callback whether
//! exiting is safe right now; if not, it asks again every retry interval
//! until the callback agrees.
//!
//! Deletion is detected by polling for the file's existence on a short
//! interval, like the other watchers in this daemon.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// How often the quit file's existence is checked.
const FILE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default delay between checks once the file is gone.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Answer from the check callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitCheck {
    /// Not safe to exit yet, ask again after the retry interval
    KeepChecking,
    /// Exit now
    Done,
}

#[derive(Error, Debug)]
pub enum QuitWatchError {
    #[error("Cannot watch quit file {path}: {source}")]
    Setup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Quit watch must be armed from within a tokio runtime")]
    NoRuntime,
}

/// An armed quit file watch.
///
/// Disarming (explicitly, on resolution, or on drop) stops the watch task
/// and its retry timer. Disarming twice is a no-op.
pub struct QuitWatch {
    path: PathBuf,
    task: Option<JoinHandle<()>>,
    done: Option<oneshot::Receiver<()>>,
}

impl QuitWatch {
    /// Start watching `path`.
    ///
    /// Fails if the file's directory cannot be inspected, since the watch
    /// would otherwise never fire.
    pub fn arm<F>(path: impl Into<PathBuf>, check: F, retry: Duration) -> Result<Self, QuitWatchError>
    where
        F: FnMut() -> QuitCheck + Send + 'static,
    {
        Self::arm_with_poll_interval(path.into(), check, retry, FILE_POLL_INTERVAL)
    }

    fn arm_with_poll_interval<F>(
        path: PathBuf,
        check: F,
        retry: Duration,
        poll_interval: Duration,
    ) -> Result<Self, QuitWatchError>
    where
        F: FnMut() -> QuitCheck + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| QuitWatchError::NoRuntime)?;

        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let metadata = std::fs::metadata(&parent).map_err(|source| QuitWatchError::Setup {
            path: path.clone(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(QuitWatchError::Setup {
                path: path.clone(),
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} is not a directory", parent.display()),
                ),
            });
        }

        let present = file_exists(&path).map_err(|source| QuitWatchError::Setup {
            path: path.clone(),
            source,
        })?;

        info!(path = %path.display(), present, "Watching quit file");

        let (done_tx, done_rx) = oneshot::channel();
        let task = runtime.spawn(watch(
            path.clone(),
            present,
            check,
            retry,
            poll_interval,
            done_tx,
        ));

        Ok(Self {
            path,
            task: Some(task),
            done: Some(done_rx),
        })
    }

    /// True until the watch resolves or is disarmed.
    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Wait until the callback answers `Done`.
    ///
    /// Never completes once the watch has been disarmed, so it can sit in a
    /// `select!` next to other shutdown sources.
    pub async fn resolved(&mut self) {
        if let Some(done) = self.done.as_mut() {
            if done.await.is_ok() {
                self.done = None;
                self.disarm();
                return;
            }
            self.done = None;
        }
        std::future::pending::<()>().await
    }

    /// Stop watching. Safe to call any number of times.
    pub fn disarm(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(path = %self.path.display(), "Quit watch disarmed");
        }
    }
}

impl Drop for QuitWatch {
    fn drop(&mut self) {
        self.disarm();
    }
}

async fn watch<F>(
    path: PathBuf,
    mut seen: bool,
    mut check: F,
    retry: Duration,
    poll_interval: Duration,
    done: oneshot::Sender<()>,
) where
    F: FnMut() -> QuitCheck + Send + 'static,
{
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Fire on a present -> absent transition.
    loop {
        ticker.tick().await;
        // Transient stat errors count as "still there".
        let exists = file_exists(&path).unwrap_or(true);
        if seen && !exists {
            break;
        }
        seen |= exists;
    }

    info!(path = %path.display(), "Quit file deleted");
    if check() == QuitCheck::Done {
        let _ = done.send(());
        return;
    }

    let mut retry_timer = interval_at(Instant::now() + retry, retry);
    retry_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        retry_timer.tick().await;
        if check() == QuitCheck::Done {
            let _ = done.send(());
            return;
        }
        debug!("Not ready to quit yet");
    }
}

fn file_exists(path: &Path) -> io::Result<bool> {
    match std::fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::time::{sleep, timeout};

    const POLL: Duration = Duration::from_millis(10);
    const RETRY: Duration = Duration::from_millis(20);

    fn counting(answers: Vec<QuitCheck>) -> (Arc<AtomicUsize>, impl FnMut() -> QuitCheck + Send + 'static) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let check = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            answers.get(n).copied().unwrap_or(QuitCheck::Done)
        };
        (calls, check)
    }

    #[tokio::test]
    async fn test_fires_when_file_deleted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quit");
        std::fs::write(&path, b"").unwrap();

        let (calls, check) = counting(vec![QuitCheck::Done]);
        let mut watch = QuitWatch::arm_with_poll_interval(path.clone(), check, RETRY, POLL).unwrap();
        assert!(watch.is_armed());

        sleep(POLL * 3).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        std::fs::remove_file(&path).unwrap();
        timeout(Duration::from_secs(5), watch.resolved()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!watch.is_armed());
    }

    #[tokio::test]
    async fn test_keeps_checking_until_done() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quit");
        std::fs::write(&path, b"").unwrap();

        let (calls, check) = counting(vec![QuitCheck::KeepChecking, QuitCheck::KeepChecking]);
        let mut watch = QuitWatch::arm_with_poll_interval(path.clone(), check, RETRY, POLL).unwrap();

        std::fs::remove_file(&path).unwrap();
        timeout(Duration::from_secs(5), watch.resolved()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_file_created_after_arming() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quit");

        let (calls, check) = counting(vec![]);
        let mut watch = QuitWatch::arm_with_poll_interval(path.clone(), check, RETRY, POLL).unwrap();

        sleep(POLL * 3).await;
        std::fs::write(&path, b"").unwrap();
        sleep(POLL * 3).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        std::fs::remove_file(&path).unwrap();
        timeout(Duration::from_secs(5), watch.resolved()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disarm_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quit");
        std::fs::write(&path, b"").unwrap();

        let (calls, check) = counting(vec![]);
        let mut watch = QuitWatch::arm_with_poll_interval(path.clone(), check, RETRY, POLL).unwrap();
        watch.disarm();
        watch.disarm();
        assert!(!watch.is_armed());

        std::fs::remove_file(&path).unwrap();
        assert!(timeout(POLL * 10, watch.resolved()).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_directory_is_setup_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("quit");

        let result = QuitWatch::arm(path, || QuitCheck::Done, DEFAULT_RETRY_INTERVAL);
        assert!(matches!(result, Err(QuitWatchError::Setup { .. })));
    }

    #[test]
    fn test_requires_runtime() {
        let dir = TempDir::new().unwrap();
        let result = QuitWatch::arm(dir.path().join("quit"), || QuitCheck::Done, RETRY);
        assert!(matches!(result, Err(QuitWatchError::NoRuntime)));
    }
}
