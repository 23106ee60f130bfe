//! Drives the daemon through poll, fetch and apply.
//!
//! The loop reacts to state changes only: each new state either starts the
//! next step, waits for the daemon to move on, or ends the run. Steps past
//! the configured last automatic step are never started, and polling happens
//! at most once per run so a poll that finds nothing cannot loop.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use osupdate_common::msgid;
use osupdate_ipc::{IpcError, Properties, Subscription, UpdateState, UpdateStep, UpdaterClient};
use tracing::{debug, error, info};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// What to do after observing a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// Nothing to do until the next state change
    Wait,
    /// Start this step
    Call(UpdateStep),
    /// End the run
    Stop(Outcome),
}

/// Per-run bookkeeping for the state reactions.
#[derive(Debug, Clone)]
pub struct RunContext {
    last_step: UpdateStep,
    volume: Option<PathBuf>,
    previous: UpdateState,
    polled: bool,
    initial: bool,
}

impl RunContext {
    /// A run allowed to go up to `last_step`.
    ///
    /// Updating from a volume is an explicit request, so it always goes all
    /// the way to applying.
    pub fn new(last_step: UpdateStep, volume: Option<PathBuf>) -> Self {
        let last_step = if volume.is_some() { UpdateStep::LAST } else { last_step };
        Self {
            last_step,
            volume,
            previous: UpdateState::None,
            polled: false,
            initial: true,
        }
    }

    pub fn last_step(&self) -> UpdateStep {
        self.last_step
    }

    pub fn volume(&self) -> Option<&Path> {
        self.volume.as_deref()
    }

    /// React to the daemon entering `state`.
    pub fn react(&mut self, state: UpdateState) -> Reaction {
        // A failure left over from an earlier run is not this run's problem.
        let state = if std::mem::take(&mut self.initial) && state == UpdateState::Error {
            UpdateState::Ready
        } else {
            state
        };

        if state == self.previous {
            return Reaction::Wait;
        }
        self.previous = state;

        match state {
            UpdateState::None
            | UpdateState::Polling
            | UpdateState::Fetching
            | UpdateState::ApplyingUpdate => Reaction::Wait,
            UpdateState::Ready => self.step(UpdateStep::Poll),
            UpdateState::UpdateAvailable => self.step(UpdateStep::Fetch),
            UpdateState::UpdateReady => self.step(UpdateStep::Apply),
            UpdateState::Error => Reaction::Stop(Outcome::Failure),
            UpdateState::UpdateApplied => Reaction::Stop(Outcome::Success),
        }
    }

    fn step(&mut self, step: UpdateStep) -> Reaction {
        if step > self.last_step {
            return Reaction::Stop(Outcome::Success);
        }
        if step == UpdateStep::Poll {
            if self.polled {
                return Reaction::Stop(Outcome::Success);
            }
            self.polled = true;
        }
        Reaction::Call(step)
    }
}

/// The daemon as seen by the control loop.
#[async_trait]
pub trait UpdaterProxy: Send {
    /// Next property snapshot, or `None` once the daemon has gone away.
    async fn next_properties(&mut self) -> Result<Option<Properties>, IpcError>;

    async fn poll(&mut self) -> Result<(), IpcError>;

    async fn poll_volume(&mut self, path: &Path) -> Result<(), IpcError>;

    async fn fetch(&mut self) -> Result<(), IpcError>;

    async fn apply(&mut self) -> Result<(), IpcError>;
}

/// Proxy over the daemon socket.
pub struct DaemonProxy {
    client: UpdaterClient,
    subscription: Subscription,
}

impl DaemonProxy {
    /// Subscribe to state changes. The first snapshot is the current state.
    pub async fn connect(client: UpdaterClient) -> Result<Self, IpcError> {
        let subscription = client.subscribe().await?;
        Ok(Self {
            client,
            subscription,
        })
    }
}

#[async_trait]
impl UpdaterProxy for DaemonProxy {
    async fn next_properties(&mut self) -> Result<Option<Properties>, IpcError> {
        self.subscription.next().await
    }

    async fn poll(&mut self) -> Result<(), IpcError> {
        self.client.poll(None).await
    }

    async fn poll_volume(&mut self, path: &Path) -> Result<(), IpcError> {
        self.client.poll_volume(path).await
    }

    async fn fetch(&mut self) -> Result<(), IpcError> {
        self.client.fetch().await
    }

    async fn apply(&mut self) -> Result<(), IpcError> {
        self.client.apply().await
    }
}

/// Run the state reactions until the run ends.
pub async fn run<P>(proxy: &mut P, mut ctx: RunContext) -> Outcome
where
    P: UpdaterProxy + ?Sized,
{
    loop {
        let properties = match proxy.next_properties().await {
            Ok(Some(properties)) => properties,
            Ok(None) => {
                error!(message_id = msgid::DAEMON_ERROR, "Updater daemon went away");
                return Outcome::Failure;
            }
            Err(e) => {
                error!(message_id = msgid::DAEMON_ERROR, error = %e, "Lost connection to updater daemon");
                return Outcome::Failure;
            }
        };

        let reaction = ctx.react(properties.state);
        if reaction != Reaction::Wait {
            info!(state = %properties.state, "Updater state changed");
        }

        let step = match reaction {
            Reaction::Wait => continue,
            Reaction::Stop(Outcome::Failure) if properties.state == UpdateState::Error => {
                error!(
                    message_id = msgid::DAEMON_ERROR,
                    error_name = %properties.error_name,
                    "Updater error ({}): {}",
                    properties.error_name,
                    properties.error_message
                );
                return Outcome::Failure;
            }
            Reaction::Stop(outcome) => {
                debug!(?outcome, state = %properties.state, "Run finished");
                return outcome;
            }
            Reaction::Call(step) => step,
        };

        debug!(?step, "Starting update step");
        let called = match step {
            UpdateStep::Poll => match ctx.volume() {
                Some(path) => proxy.poll_volume(path).await,
                None => proxy.poll().await,
            },
            UpdateStep::Fetch => proxy.fetch().await,
            UpdateStep::Apply => proxy.apply().await,
            UpdateStep::None => Ok(()),
        };

        if let Err(e) = called {
            error!(message_id = msgid::DAEMON_ERROR, error = %e, "Error calling updater daemon");
            return Outcome::Failure;
        }
    }
}
