//! Command-line argument parsing.

use clap::Parser;

/// osupdate daemon - serializes OS image updates for local clients
#[derive(Parser, Debug, Default)]
#[command(name = "osupdate-daemon")]
#[command(about = "osupdate daemon - serializes OS image updates for local clients")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (optional, defaults used if not found)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Path of the IPC socket
    #[arg(long)]
    pub socket: Option<String>,

    /// Enable development mode (mock tree store)
    #[arg(long)]
    pub dev: bool,

    /// Exit once this file is deleted and no operation is running
    #[arg(long, env = "OSUPDATE_DAEMON_QUIT_FILE")]
    pub quit_file: Option<String>,
}
