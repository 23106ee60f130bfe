//! Command-line argument parsing.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use osupdate_ipc::{DEFAULT_CALL_TIMEOUT, DEFAULT_SOCKET_PATH};

use crate::autoupdate::RunOptions;
use crate::schedule::DEFAULT_STAMP_DIR;

/// osupdate autoupdater - poll for, fetch and apply OS updates in the background
#[derive(Parser, Debug)]
#[command(name = "osupdate-autoupdater")]
#[command(about = "Automatically poll for, fetch and apply updates in the background")]
#[command(version)]
pub struct Args {
    /// Configuration file, tried before the system locations
    #[arg(short, long, env = "OSUPDATE_AUTOUPDATER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Updater daemon socket
    #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,

    /// Force an update
    #[arg(long)]
    pub force_update: bool,

    /// Poll for updates from the volume
    #[arg(long, value_name = "PATH")]
    pub from_volume: Option<PathBuf>,

    /// Directory holding the stamp file
    #[arg(long, env = "OSUPDATE_AUTOUPDATER_STAMP_DIR", default_value = DEFAULT_STAMP_DIR)]
    pub stamp_dir: PathBuf,

    /// Timeout for daemon calls, in seconds
    #[arg(long, value_name = "SECS", env = "OSUPDATE_AUTOUPDATER_IPC_TIMEOUT")]
    pub ipc_timeout: Option<u64>,
}

impl Args {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            force_update: self.force_update,
            from_volume: self.from_volume.clone(),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.ipc_timeout
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CALL_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["osupdate-autoupdater"]).unwrap();
        assert_eq!(args.socket, PathBuf::from(DEFAULT_SOCKET_PATH));
        assert!(!args.run_options().is_forced());
    }

    #[test]
    fn test_from_volume_forces() {
        let args =
            Args::try_parse_from(["osupdate-autoupdater", "--from-volume", "/media/usb", "--ipc-timeout", "3"])
                .unwrap();
        let options = args.run_options();
        assert_eq!(options.from_volume, Some(PathBuf::from("/media/usb")));
        assert!(options.is_forced());
        assert_eq!(args.call_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        assert!(Args::try_parse_from(["osupdate-autoupdater", "--reboot"]).is_err());
    }
}
