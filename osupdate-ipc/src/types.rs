//! Types shared between the daemon and its clients.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// State of the updater daemon.
///
/// The integer codes are stable and match the declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateState {
    /// Starting up; the daemon will move on by itself
    None,
    /// Idle, ready to poll
    Ready,
    /// Last operation failed; see the error name/message
    Error,
    /// Checking for an update
    Polling,
    /// An update was found and can be fetched
    UpdateAvailable,
    /// Downloading the update
    Fetching,
    /// Update downloaded and can be applied
    UpdateReady,
    /// Deploying the update
    ApplyingUpdate,
    /// Update deployed; takes effect on reboot
    UpdateApplied,
}

impl UpdateState {
    pub const ALL: [UpdateState; 9] = [
        UpdateState::None,
        UpdateState::Ready,
        UpdateState::Error,
        UpdateState::Polling,
        UpdateState::UpdateAvailable,
        UpdateState::Fetching,
        UpdateState::UpdateReady,
        UpdateState::ApplyingUpdate,
        UpdateState::UpdateApplied,
    ];

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// States in which an operation is running on the tree store.
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            UpdateState::Polling | UpdateState::Fetching | UpdateState::ApplyingUpdate
        )
    }

    /// States in which the daemon can stop without abandoning work.
    pub fn is_quiescent(self) -> bool {
        matches!(
            self,
            UpdateState::None | UpdateState::Ready | UpdateState::Error | UpdateState::UpdateApplied
        )
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpdateState::None => "None",
            UpdateState::Ready => "Ready",
            UpdateState::Error => "Error",
            UpdateState::Polling => "Polling",
            UpdateState::UpdateAvailable => "UpdateAvailable",
            UpdateState::Fetching => "Fetching",
            UpdateState::UpdateReady => "UpdateReady",
            UpdateState::ApplyingUpdate => "ApplyingUpdate",
            UpdateState::UpdateApplied => "UpdateApplied",
        };
        f.write_str(s)
    }
}

/// How far along the update process a step is.
///
/// Used to cap automatic progression: a configured last step of `Fetch`
/// allows polling and fetching but never applying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UpdateStep {
    None = 0,
    Poll = 1,
    Fetch = 2,
    Apply = 3,
}

impl UpdateStep {
    pub const FIRST: UpdateStep = UpdateStep::None;
    pub const LAST: UpdateStep = UpdateStep::Apply;

    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            0 => Some(UpdateStep::None),
            1 => Some(UpdateStep::Poll),
            2 => Some(UpdateStep::Fetch),
            3 => Some(UpdateStep::Apply),
            _ => None,
        }
    }
}

/// An operation the daemon exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateOperation {
    Poll,
    PollFromVolume,
    Fetch,
    Apply,
}

impl UpdateOperation {
    /// State the daemon moves to while the operation runs.
    pub fn in_progress_state(self) -> UpdateState {
        match self {
            UpdateOperation::Poll | UpdateOperation::PollFromVolume => UpdateState::Polling,
            UpdateOperation::Fetch => UpdateState::Fetching,
            UpdateOperation::Apply => UpdateState::ApplyingUpdate,
        }
    }
}

impl fmt::Display for UpdateOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Where an update was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpdateOrigin {
    /// The configured remote origin server
    Remote,
    /// A repository on locally attached media
    Volume { path: PathBuf },
}

/// Metadata of a candidate commit, as reported by the tree store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMetadata {
    /// Release version string, if the commit carries one
    #[serde(default)]
    pub version: Option<String>,
    /// Commit subject line
    #[serde(default)]
    pub subject: String,
    /// Commit timestamp (seconds since the Unix epoch)
    #[serde(default)]
    pub timestamp: i64,
    /// Bytes that still need to be downloaded
    #[serde(default)]
    pub download_size: u64,
    /// Size of the tree once unpacked
    #[serde(default)]
    pub unpacked_size: u64,
}

/// A candidate update produced by a successful poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    /// Checksum of the candidate commit
    pub checksum: String,
    /// Refspec the update will be deployed from
    pub refspec: String,
    /// Refspec of the currently booted deployment
    pub original_refspec: String,
    /// Where the update was found
    pub origin: UpdateOrigin,
    /// Commit metadata
    pub metadata: CommitMetadata,
}

/// Readable properties of the daemon, published on every state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Properties {
    pub state: UpdateState,
    /// Error name; empty unless `state` is `Error`
    #[serde(default)]
    pub error_name: String,
    /// Error message; empty unless `state` is `Error`
    #[serde(default)]
    pub error_message: String,
    /// Checksum of the booted deployment
    #[serde(default)]
    pub current_id: String,
    /// Checksum of the candidate update, if any
    #[serde(default)]
    pub update_id: String,
    #[serde(default)]
    pub update_refspec: String,
    #[serde(default)]
    pub original_refspec: String,
    #[serde(default)]
    pub update_origin: Option<UpdateOrigin>,
    #[serde(default)]
    pub update_version: String,
    #[serde(default)]
    pub update_message: String,
    #[serde(default)]
    pub download_size: u64,
    #[serde(default)]
    pub unpacked_size: u64,
}

impl Properties {
    pub fn new(state: UpdateState) -> Self {
        Self {
            state,
            error_name: String::new(),
            error_message: String::new(),
            current_id: String::new(),
            update_id: String::new(),
            update_refspec: String::new(),
            original_refspec: String::new(),
            update_origin: None,
            update_version: String::new(),
            update_message: String::new(),
            download_size: 0,
            unpacked_size: 0,
        }
    }
}

/// Fully-qualified error names reported in `Properties::error_name` and in
/// error replies.
pub mod error_name {
    pub const WRONG_STATE: &str = "org.osupdate.Updater.Error.WrongState";
    pub const BUSY: &str = "org.osupdate.Updater.Error.Busy";
    pub const LIVE_BOOT: &str = "org.osupdate.Updater.Error.LiveBoot";
    pub const NOT_OSTREE_SYSTEM: &str = "org.osupdate.Updater.Error.NotOstreeSystem";
    pub const WRONG_CONFIGURATION: &str = "org.osupdate.Updater.Error.WrongConfiguration";
    pub const FETCHING: &str = "org.osupdate.Updater.Error.Fetching";
    pub const FAILED: &str = "org.osupdate.Updater.Error.Failed";
    pub const INVALID_REQUEST: &str = "org.osupdate.Updater.Error.InvalidRequest";
}
