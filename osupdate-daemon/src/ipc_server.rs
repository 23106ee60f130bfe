//! Unix socket front end for the updater.
//!
//! One request per connection. `Subscribe` keeps the connection open and
//! streams a `StateChanged` frame for the current snapshot followed by one
//! per transition, until the client hangs up.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use osupdate_ipc::protocol::{read_message, write_message};
use osupdate_ipc::{error_name, IpcError, Request, Response};
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::updater::Updater;

/// Listening socket owned by this daemon instance.
///
/// The socket file is removed when the server is dropped.
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
    updater: Arc<Updater>,
}

impl IpcServer {
    /// Take ownership of `socket_path`.
    ///
    /// Fails if another daemon is answering on it. A leftover socket file
    /// with nobody listening is replaced.
    pub async fn bind(socket_path: impl Into<PathBuf>, updater: Arc<Updater>) -> Result<Self> {
        let socket_path = socket_path.into();

        if let Some(parent) = socket_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        if UnixStream::connect(&socket_path).await.is_ok() {
            bail!(
                "Another updater daemon is already listening on {}",
                socket_path.display()
            );
        }
        if tokio::fs::symlink_metadata(&socket_path).await.is_ok() {
            warn!(path = %socket_path.display(), "Removing stale socket");
            tokio::fs::remove_file(&socket_path)
                .await
                .with_context(|| format!("Failed to remove {}", socket_path.display()))?;
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind {}", socket_path.display()))?;
        info!(path = %socket_path.display(), "IPC socket listening");

        Ok(Self {
            listener,
            socket_path,
            updater,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until the task is dropped.
    pub async fn run(&self) {
        loop {
            let stream = match self.listener.accept().await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!(error = %e, "Failed to accept IPC connection");
                    continue;
                }
            };

            let updater = Arc::clone(&self.updater);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, updater).await {
                    debug!(error = %e, "IPC connection ended with error");
                }
            });
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            debug!(error = %e, path = %self.socket_path.display(), "Failed to remove socket");
        }
    }
}

async fn handle_connection(mut stream: UnixStream, updater: Arc<Updater>) -> Result<(), IpcError> {
    let request: Request = match read_message(&mut stream).await {
        Ok(Some(request)) => request,
        Ok(None) => return Ok(()),
        Err(IpcError::Decode(e)) => {
            let reply = Response::error(error_name::INVALID_REQUEST, e.to_string());
            return write_message(&mut stream, &reply).await;
        }
        Err(e) => return Err(e),
    };

    debug!(?request, "Received IPC request");

    if request == Request::Subscribe {
        return stream_notifications(stream, &updater).await;
    }

    let reply = dispatch(&updater, request);
    write_message(&mut stream, &reply).await
}

/// Run one request against the updater and build the reply.
///
/// Operations reply `Ok` as soon as they have started; their outcome is
/// visible through the state.
pub fn dispatch(updater: &Arc<Updater>, request: Request) -> Response {
    let started = match request {
        Request::GetProperties => {
            return Response::Properties {
                properties: updater.properties(),
            }
        }
        Request::Subscribe => {
            return Response::error(
                error_name::INVALID_REQUEST,
                "Subscribe must be the first request on a connection",
            )
        }
        Request::Poll { refspec } => updater.poll(refspec),
        Request::PollVolume { path } => updater.poll_volume(path),
        Request::Fetch => updater.fetch(),
        Request::Apply => updater.apply(),
    };

    match started {
        Ok(pending) => {
            info!(operation = %pending.operation(), "Operation started");
            Response::Ok
        }
        Err(e) => {
            info!(error_name = e.error_name(), error = %e, "Rejected request");
            Response::error(e.error_name(), e.to_string())
        }
    }
}

async fn stream_notifications(stream: UnixStream, updater: &Updater) -> Result<(), IpcError> {
    let (snapshot, mut events) = updater.subscribe();
    let (mut reader, mut writer) = stream.into_split();

    write_message(&mut writer, &Response::StateChanged { properties: snapshot }).await?;

    let mut probe = [0u8; 1];
    loop {
        let properties = tokio::select! {
            event = events.recv() => match event {
                Ok(properties) => properties,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber lagging, sending current state");
                    updater.properties()
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            // Subscribers never send anything else; data or EOF ends it.
            _ = reader.read(&mut probe) => {
                debug!("Subscriber disconnected");
                return Ok(());
            }
        };

        write_message(&mut writer, &Response::StateChanged { properties }).await?;
    }
}
