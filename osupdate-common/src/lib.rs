//! # osupdate Common
//!
//! Shared utilities for the osupdate daemon and autoupdater.
//!
//! ## Logging
//!
//! ```rust,ignore
//! use osupdate_common::{init_logging, msgid};
//!
//! init_logging("info").unwrap();
//! tracing::info!(message_id = msgid::SUCCESS, "Updater finished successfully");
//! ```
//!
//! ## Peer advertisement
//!
//! [`advertise`] writes and removes the service record that announces this
//! machine as a local-network source of its installed OS image.

pub mod advertise;
pub mod fs;
pub mod logging;
pub mod msgid;

// Re-export logging functions
pub use logging::{init_logging, init_logging_json};
