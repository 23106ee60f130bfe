//! One autoupdater invocation: gate, drive the daemon, record the run.

use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::SystemTime;

use osupdate_common::msgid;
use osupdate_ipc::IpcError;
use rand::RngCore;
use tracing::{debug, error, info};

use crate::config::AutoupdateConfig;
use crate::connectivity::Connectivity;
use crate::control_loop::{self, Outcome, RunContext, UpdaterProxy};
use crate::schedule::{self, ScheduleStore};

/// Process exit statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Finished, or decided there was nothing to do
    Ok = 0,
    /// The daemon could not be reached or reported an error
    Failed = 1,
    InvalidArguments = 2,
    BadConfiguration = 3,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}

/// Command line choices that affect gating.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Skip the metered and schedule checks
    pub force_update: bool,
    /// Update from a repository on this volume instead of the network
    pub from_volume: Option<PathBuf>,
}

impl RunOptions {
    /// Updating from a volume is always forced.
    pub fn is_forced(&self) -> bool {
        self.force_update || self.from_volume.is_some()
    }
}

/// Decide whether this invocation should contact the daemon.
///
/// Reading the schedule may create the first stamp as a side effect.
pub fn should_run(
    options: &RunOptions,
    config: &AutoupdateConfig,
    connectivity: &dyn Connectivity,
    store: &dyn ScheduleStore,
    now: SystemTime,
    rng: &mut dyn RngCore,
) -> bool {
    if options.from_volume.is_none() && !connectivity.is_online() {
        info!(message_id = msgid::NOT_ONLINE, "Not currently online. Not updating");
        return false;
    }

    if options.is_forced() {
        debug!(?options, "Update forced, skipping schedule checks");
        return true;
    }

    if !config.update_on_mobile && connectivity.is_metered() {
        info!(
            message_id = msgid::METERED_CONNECTION,
            "Connected to a metered network. Not updating"
        );
        return false;
    }

    if !schedule::is_due(
        store,
        now,
        config.interval_days,
        config.randomized_delay_days,
        rng,
    ) {
        info!(
            message_id = msgid::NOT_TIME,
            interval_days = config.interval_days,
            "Less than IntervalDays since last update. Exiting"
        );
        return false;
    }

    true
}

/// Gate, then drive the daemon with the proxy from `connect`.
///
/// The schedule is only touched after a successful run, so a failed run is
/// retried on the next invocation.
pub async fn run<C, F, P>(
    options: &RunOptions,
    config: &AutoupdateConfig,
    connectivity: &dyn Connectivity,
    store: &dyn ScheduleStore,
    rng: &mut dyn RngCore,
    connect: C,
) -> ExitStatus
where
    C: FnOnce() -> F,
    F: Future<Output = Result<P, IpcError>>,
    P: UpdaterProxy,
{
    if !should_run(options, config, connectivity, store, SystemTime::now(), rng) {
        return ExitStatus::Ok;
    }

    let mut proxy = match connect().await {
        Ok(proxy) => proxy,
        Err(e) => {
            error!(message_id = msgid::DAEMON_ERROR, error = %e, "Error getting updater daemon");
            return ExitStatus::Failed;
        }
    };

    let ctx = RunContext::new(config.last_automatic_step, options.from_volume.clone());
    debug!(last_step = ?ctx.last_step(), "Starting automatic update");

    match control_loop::run(&mut proxy, ctx).await {
        Outcome::Failure => ExitStatus::Failed,
        Outcome::Success => {
            // A stamp failure only means checking again sooner.
            if let Err(e) = schedule::restamp(
                store,
                SystemTime::now(),
                config.interval_days,
                config.randomized_delay_days,
                rng,
            ) {
                error!(message_id = e.message_id(), error = %e, "Failed to write updater stamp file");
            }
            info!(message_id = msgid::SUCCESS, "Updater finished successfully");
            ExitStatus::Ok
        }
    }
}
