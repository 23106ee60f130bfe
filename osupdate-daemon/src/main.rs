//! # osupdate daemon
//!
//! Runs the update state machine and serves it on a Unix socket.
//!
//! ## Usage
//! ```bash
//! osupdate-daemon --config /etc/osupdate/daemon.yaml
//! ```

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use osupdate_daemon::cli::Args;
use osupdate_daemon::config::{Config, DEFAULT_CONFIG_PATH};
use osupdate_daemon::server;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    if args.log_json {
        osupdate_common::init_logging_json(&args.log_level)?;
    } else {
        osupdate_common::init_logging(&args.log_level)?;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting osupdate daemon"
    );

    // Load configuration
    let config = match &args.config {
        Some(config_path) => match Config::load(config_path) {
            Ok(cfg) => {
                info!(config_path = %config_path, "Configuration loaded");
                cfg.with_cli_overrides(&args)
            }
            Err(e) => {
                error!(error = %e, path = %config_path, "Failed to load configuration");
                return Err(e);
            }
        },
        None => match Config::load(DEFAULT_CONFIG_PATH) {
            Ok(cfg) => {
                info!(config_path = %DEFAULT_CONFIG_PATH, "Configuration loaded from default location");
                cfg.with_cli_overrides(&args)
            }
            Err(_) => {
                info!("No config file found, using CLI arguments and defaults");
                Config::default_with_cli(&args)
            }
        },
    };

    info!(
        socket = %config.ipc.socket_path,
        tree_store = ?config.tree_store.backend,
        quit_file = ?config.quit_file.path,
        "Daemon configured"
    );

    if let Err(e) = server::run(config).await {
        error!(error = %e, "Daemon failed");
        return Err(e);
    }

    Ok(())
}
