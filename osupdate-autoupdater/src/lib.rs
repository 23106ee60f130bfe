//! # osupdate autoupdater
//!
//! The unprivileged half of the updater. Each invocation checks whether an
//! automatic update is allowed right now and, if so, follows the daemon's
//! state changes, starting each step in turn up to the configured last one.
//!
//! - [`config`]: the autoupdate policy file
//! - [`schedule`]: stamp file and randomized delay
//! - [`connectivity`]: online and metered checks
//! - [`control_loop`]: reactions to daemon state changes
//! - [`autoupdate`]: gating and exit statuses for one invocation

pub mod autoupdate;
pub mod cli;
pub mod config;
pub mod connectivity;
pub mod control_loop;
pub mod schedule;

pub use autoupdate::{ExitStatus, RunOptions};
pub use config::{AutoupdateConfig, ConfigError};
pub use control_loop::{DaemonProxy, Outcome, RunContext, UpdaterProxy};
pub use schedule::{ScheduleError, ScheduleStore, StampFile};
