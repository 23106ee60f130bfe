//! Daemon setup and lifecycle.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn};

use osupdate_common::advertise::{self, Advertisement};

use crate::config::{AdvertiseConfig, Config, TreeStoreBackend};
use crate::ipc_server::IpcServer;
use crate::quit_watch::{QuitCheck, QuitWatch};
use crate::tree_store::{MockTreeStore, OstreeCli, TreeStore};
use crate::updater::Updater;

/// Kernel command line token set when running from a live medium.
const LIVE_BOOT_TOKEN: &str = "osupdate.live_boot";

/// Run the daemon until a signal arrives or the quit file is deleted.
pub async fn run(config: Config) -> Result<()> {
    let store: Arc<dyn TreeStore> = match config.tree_store.backend {
        TreeStoreBackend::Mock => {
            info!("Using mock tree store");
            Arc::new(MockTreeStore::new())
        }
        TreeStoreBackend::Ostree => {
            info!(
                binary = %config.tree_store.ostree_binary,
                sysroot = %config.tree_store.sysroot,
                "Using ostree tree store"
            );
            Arc::new(OstreeCli::new(
                config.tree_store.ostree_binary.clone(),
                config.tree_store.sysroot.clone(),
                config.tree_store.os_name.clone(),
            ))
        }
    };

    let live_boot = detect_live_boot().await;
    let updater = Arc::new(Updater::new(store).with_live_boot(live_boot));
    updater.init().await;

    update_advertisement(&config.advertise, &updater);

    let server = IpcServer::bind(&config.ipc.socket_path, Arc::clone(&updater))
        .await
        .context("Failed to set up IPC socket")?;

    let mut quit_watch = match &config.quit_file.path {
        Some(path) => Some(
            arm_quit_watch(path, &updater, &config)
                .with_context(|| format!("Failed to watch quit file {path}"))?,
        ),
        None => None,
    };

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!(
        socket = %server.socket_path().display(),
        state = %updater.current_state(),
        "Daemon ready"
    );

    tokio::select! {
        _ = server.run() => {}
        _ = wait_for_quit(&mut quit_watch) => {
            info!("Quit file removed and updater idle, shutting down");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    if let Some(watch) = quit_watch.as_mut() {
        watch.disarm();
    }
    drop(server);

    info!("Daemon stopped");
    Ok(())
}

fn arm_quit_watch(path: &str, updater: &Arc<Updater>, config: &Config) -> Result<QuitWatch> {
    let updater = Arc::clone(updater);
    let watch = QuitWatch::arm(
        path,
        move || {
            let state = updater.current_state();
            if state.is_quiescent() {
                QuitCheck::Done
            } else {
                debug!(state = %state, "Operation in progress, not quitting yet");
                QuitCheck::KeepChecking
            }
        },
        config.quit_file.retry_interval(),
    )?;
    Ok(watch)
}

async fn wait_for_quit(watch: &mut Option<QuitWatch>) {
    match watch {
        Some(watch) => watch.resolved().await,
        None => std::future::pending().await,
    }
}

async fn detect_live_boot() -> bool {
    match tokio::fs::read_to_string("/proc/cmdline").await {
        Ok(cmdline) => {
            let live = is_live_boot(&cmdline);
            if live {
                info!("Live boot detected from kernel command line");
            }
            live
        }
        Err(e) => {
            warn!(error = %e, "Failed to read /proc/cmdline, assuming installed system");
            false
        }
    }
}

fn is_live_boot(cmdline: &str) -> bool {
    cmdline
        .split_whitespace()
        .any(|arg| arg == LIVE_BOOT_TOKEN || arg.starts_with(&format!("{LIVE_BOOT_TOKEN}=")))
}

/// Write or remove the local-network advertisement of the booted image.
///
/// Failures are logged and otherwise ignored; updating still works without
/// the advertisement.
fn update_advertisement(config: &AdvertiseConfig, updater: &Updater) {
    let dir = Path::new(&config.directory);

    if !config.enabled {
        if let Err(e) = advertise::delete(dir) {
            warn!(error = %e, "Failed to remove advertisement record");
        }
        return;
    }

    let Some(booted) = updater.booted() else {
        warn!("No booted deployment, not advertising");
        return;
    };

    let ostree_path = config.ostree_path.clone().or_else(|| {
        booted
            .remote_url
            .as_deref()
            .and_then(advertise::ostree_path_from_url)
    });
    let Some(ostree_path) = ostree_path else {
        warn!("Cannot determine the repository path to advertise");
        return;
    };

    let Some(head_commit_timestamp) = DateTime::<Utc>::from_timestamp(booted.commit_timestamp, 0) else {
        warn!(timestamp = booted.commit_timestamp, "Booted commit timestamp out of range");
        return;
    };

    let advertisement = Advertisement {
        ostree_path,
        head_commit_timestamp,
        port: config.port,
    };
    if let Err(e) = advertise::generate(dir, &advertisement) {
        warn!(error = %e, "Failed to write advertisement record");
    }
}
