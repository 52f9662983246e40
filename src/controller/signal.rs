//! Fire-once stop signal
//!
//! Background tasks owned by a cluster or an object store share one
//! cancellation token. The signal tracks whether those tasks were started
//! and guarantees the token is fired at most once: a stopped signal can
//! neither be fired again nor restarted.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU8, Ordering};
use tokio_util::sync::CancellationToken;

const NOT_STARTED: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// Lifecycle of the tasks guarded by a [`StopSignal`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    NotStarted,
    Running,
    Stopped,
}

/// Three-state stop signal backed by a cancellation token
#[derive(Debug)]
pub struct StopSignal {
    owner: String,
    state: AtomicU8,
    token: CancellationToken,
}

impl StopSignal {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            state: AtomicU8::new(NOT_STARTED),
            token: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> SignalState {
        match self.state.load(Ordering::Acquire) {
            NOT_STARTED => SignalState::NotStarted,
            RUNNING => SignalState::Running,
            _ => SignalState::Stopped,
        }
    }

    /// Transition `NotStarted -> Running`.
    ///
    /// Returns true only for the caller that performed the transition; that
    /// caller is responsible for spawning the guarded tasks.
    pub fn start(&self) -> bool {
        self.state
            .compare_exchange(NOT_STARTED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Transition to `Stopped` and cancel the token.
    ///
    /// Fails with [`Error::SignalAlreadyFired`] when the signal was already stopped.
    pub fn fire(&self) -> Result<()> {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                (state != STOPPED).then_some(STOPPED)
            })
            .map_err(|_| Error::SignalAlreadyFired {
                owner: self.owner.clone(),
            })?;
        self.token.cancel();
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == SignalState::Stopped
    }

    /// Token handed to a guarded task; cancelled when the signal fires
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }
}
