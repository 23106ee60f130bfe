//! Request and response messages exchanged over the daemon socket.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::Properties;

/// A method call from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    /// Check the remote origin for an update. An empty or absent refspec
    /// means "the refspec of the booted deployment".
    Poll {
        #[serde(default)]
        refspec: Option<String>,
    },
    /// Check a repository on locally attached media
    PollVolume { path: PathBuf },
    Fetch,
    Apply,
    GetProperties,
    /// Turn this connection into a stream of `StateChanged` frames
    Subscribe,
}

/// A reply (or, on a subscribed connection, a notification).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// The operation was accepted and has started
    Ok,
    Properties { properties: Properties },
    Error { name: String, message: String },
    StateChanged { properties: Properties },
}

impl Response {
    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Response::Error {
            name: name.into(),
            message: message.into(),
        }
    }
}
