//! Async client for the daemon socket.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::UnixStream;
use tracing::debug;

use crate::error::{IpcError, Result};
use crate::message::{Request, Response};
use crate::protocol::{read_message, write_message};
use crate::types::Properties;

/// Default location of the daemon socket.
pub const DEFAULT_SOCKET_PATH: &str = "/run/osupdate/updater.sock";

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(25);

/// Client for the updater daemon.
///
/// Each method call uses its own connection, so a subscription stream never
/// interleaves with call replies.
#[derive(Debug, Clone)]
pub struct UpdaterClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl UpdaterClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Read the daemon's current properties.
    pub async fn properties(&self) -> Result<Properties> {
        match self.call(Request::GetProperties).await? {
            Response::Properties { properties } => Ok(properties),
            other => Err(IpcError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    pub async fn poll(&self, refspec: Option<String>) -> Result<()> {
        self.call_expect_ok(Request::Poll { refspec }).await
    }

    pub async fn poll_volume(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.call_expect_ok(Request::PollVolume { path: path.into() })
            .await
    }

    pub async fn fetch(&self) -> Result<()> {
        self.call_expect_ok(Request::Fetch).await
    }

    pub async fn apply(&self) -> Result<()> {
        self.call_expect_ok(Request::Apply).await
    }

    /// Open a notification stream. The first item is the current snapshot.
    pub async fn subscribe(&self) -> Result<Subscription> {
        let mut stream = self.connect().await?;
        with_timeout(self.timeout, write_message(&mut stream, &Request::Subscribe)).await?;
        Ok(Subscription { stream })
    }

    async fn call_expect_ok(&self, request: Request) -> Result<()> {
        match self.call(request).await? {
            Response::Ok => Ok(()),
            other => Err(IpcError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    async fn call(&self, request: Request) -> Result<Response> {
        debug!(?request, socket = %self.socket_path.display(), "Calling updater daemon");

        let mut stream = self.connect().await?;
        let response = with_timeout(self.timeout, async {
            write_message(&mut stream, &request).await?;
            read_message::<_, Response>(&mut stream).await
        })
        .await?;

        match response {
            Some(Response::Error { name, message }) => Err(IpcError::Remote { name, message }),
            Some(reply) => Ok(reply),
            None => Err(IpcError::Closed),
        }
    }

    async fn connect(&self) -> Result<UnixStream> {
        with_timeout(self.timeout, async {
            UnixStream::connect(&self.socket_path)
                .await
                .map_err(|source| IpcError::Connect {
                    path: self.socket_path.clone(),
                    source,
                })
        })
        .await
    }
}

/// Stream of property snapshots, one per daemon state change.
pub struct Subscription {
    stream: UnixStream,
}

impl Subscription {
    /// Wait for the next snapshot. `Ok(None)` means the daemon went away.
    ///
    /// There is no timeout here: operations such as fetching can take a long
    /// time without any state change.
    pub async fn next(&mut self) -> Result<Option<Properties>> {
        match read_message::<_, Response>(&mut self.stream).await? {
            Some(Response::StateChanged { properties }) => Ok(Some(properties)),
            Some(Response::Error { name, message }) => Err(IpcError::Remote { name, message }),
            Some(other) => Err(IpcError::UnexpectedReply(format!("{other:?}"))),
            None => Ok(None),
        }
    }
}

async fn with_timeout<T>(timeout: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(IpcError::Timeout(timeout)),
    }
}
