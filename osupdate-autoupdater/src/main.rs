//! # osupdate autoupdater
//!
//! Drives the updater daemon through an automatic update when the schedule,
//! network and configuration allow it. Meant to be started by a timer.
//!
//! ## Usage
//! ```bash
//! osupdate-autoupdater
//! osupdate-autoupdater --force-update
//! osupdate-autoupdater --from-volume /media/usb
//! ```

use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use tracing::{error, info};

use osupdate_autoupdater::autoupdate::{self, ExitStatus};
use osupdate_autoupdater::cli::Args;
use osupdate_autoupdater::config::{self, AutoupdateConfig};
use osupdate_autoupdater::connectivity;
use osupdate_autoupdater::control_loop::DaemonProxy;
use osupdate_autoupdater::schedule::StampFile;
use osupdate_common::msgid;
use osupdate_ipc::UpdaterClient;

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitStatus::Ok.into();
        }
        Err(e) => {
            let _ = osupdate_common::init_logging("info");
            error!(message_id = msgid::INVALID_ARGS, error = %e, "Error parsing command line arguments");
            let _ = e.print();
            return ExitStatus::InvalidArguments.into();
        }
    };

    if let Err(e) = osupdate_common::init_logging(&args.log_level) {
        eprintln!("Failed to initialize logging: {e:#}");
        return ExitStatus::InvalidArguments.into();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting osupdate autoupdater"
    );

    let config = match AutoupdateConfig::load_first(&config::search_paths(args.config.as_deref())) {
        Ok(config) => config,
        Err(e) => {
            error!(message_id = msgid::CONFIGURATION_ERROR, error = %e, "Unable to load the configuration file");
            return ExitStatus::BadConfiguration.into();
        }
    };

    let connectivity = connectivity::detect();
    let store = StampFile::new(&args.stamp_dir);
    let client = UpdaterClient::new(&args.socket).with_timeout(args.call_timeout());

    let status = autoupdate::run(
        &args.run_options(),
        &config,
        connectivity.as_ref(),
        &store,
        &mut rand::thread_rng(),
        || DaemonProxy::connect(client),
    )
    .await;

    info!(code = status.code(), "Autoupdater exiting");
    status.into()
}
