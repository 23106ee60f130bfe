//! # osupdate daemon
//!
//! The privileged half of the updater. It owns the update state machine,
//! drives the tree store, and answers clients on a Unix socket.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐  Unix socket   ┌──────────────────┐
//! │ osupdate-        │ ─────────────► │   IpcServer      │
//! │ autoupdater      │ ◄───────────── │                  │
//! └──────────────────┘  StateChanged  └────────┬─────────┘
//!                                              │
//!                                     ┌────────▼─────────┐
//!                                     │     Updater      │
//!                                     │  (state machine) │
//!                                     └────────┬─────────┘
//!                                              │ TreeStore
//!                                     ┌────────▼─────────┐
//!                                     │ ostree CLI / mock│
//!                                     └──────────────────┘
//! ```

pub mod cli;
pub mod config;
pub mod ipc_server;
pub mod quit_watch;
pub mod server;
pub mod tree_store;
pub mod updater;

pub use config::Config;
pub use ipc_server::IpcServer;
pub use quit_watch::{QuitCheck, QuitWatch, QuitWatchError};
pub use tree_store::{MockCommit, MockOp, MockTreeStore, OstreeCli, TreeStore, TreeStoreError};
pub use updater::{PendingOperation, Updater, UpdaterError};
