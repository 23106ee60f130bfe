//! # osupdate IPC
//!
//! Wire types and transport shared by the updater daemon and its clients.
//!
//! The daemon listens on a Unix stream socket. A client sends one
//! [`Request`] per connection and reads one [`Response`]; a `Subscribe`
//! request instead turns the connection into a stream of `StateChanged`
//! notifications, starting with the current snapshot.

pub mod client;
pub mod error;
pub mod message;
pub mod protocol;
pub mod types;

pub use client::{Subscription, UpdaterClient, DEFAULT_CALL_TIMEOUT, DEFAULT_SOCKET_PATH};
pub use error::IpcError;
pub use message::{Request, Response};
pub use types::{
    error_name, CommitMetadata, Properties, UpdateInfo, UpdateOperation, UpdateOrigin,
    UpdateState, UpdateStep,
};
