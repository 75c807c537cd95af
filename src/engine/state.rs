//! Engine lifecycle state
//!
//! The state lives in a single atomic and every transition is a
//! compare-and-swap, so `Running` and `Paused` can never be observed together.
//!
//! ```text
//! Idle --start--> Running --pause--> Paused --resume--> Running
//! Running|Paused --stop--> Stopped --start--> Running
//! ```

use crate::engine::EngineError;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Lifecycle state of the crawl engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EngineState {
    /// Constructed, never started
    Idle = 0,
    /// The only state in which network and storage work proceeds
    Running = 1,
    /// Work suspended, position retained
    Paused = 2,
    /// Worker told to exit (or finished); a new `start` resumes from checkpoints
    Stopped = 3,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Paused,
            _ => Self::Stopped,
        }
    }

    /// Returns true while a worker should keep going (running or paused)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Shared, atomically updated engine state
///
/// Every successful transition is also published on a watch channel so
/// in-flight requests can be abandoned the moment the engine stops.
#[derive(Debug)]
pub struct EngineControl {
    state: AtomicU8,
    changes: watch::Sender<EngineState>,
}

impl Default for EngineControl {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineControl {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(EngineState::Idle as u8),
            changes: watch::channel(EngineState::Idle).0,
        }
    }

    /// Current state
    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Moves to `to` if the current state is one of `from`; returns the previous state
    fn transition(&self, from: &[EngineState], to: EngineState) -> Result<EngineState, EngineError> {
        let mut current = self.state();
        loop {
            if !from.contains(&current) {
                return Err(EngineError::InvalidTransition { from: current, to });
            }
            match self.state.compare_exchange(
                current as u8,
                to as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    self.changes.send_replace(to);
                    return Ok(current);
                }
                Err(actual) => current = EngineState::from_u8(actual),
            }
        }
    }

    /// `Idle | Stopped -> Running`
    pub fn start(&self) -> Result<EngineState, EngineError> {
        self.transition(
            &[EngineState::Idle, EngineState::Stopped],
            EngineState::Running,
        )
    }

    /// `Running -> Paused`
    pub fn pause(&self) -> Result<EngineState, EngineError> {
        self.transition(&[EngineState::Running], EngineState::Paused)
    }

    /// `Paused -> Running`
    pub fn resume(&self) -> Result<EngineState, EngineError> {
        self.transition(&[EngineState::Paused], EngineState::Running)
    }

    /// `Running | Paused -> Stopped`
    pub fn stop(&self) -> Result<EngineState, EngineError> {
        self.transition(
            &[EngineState::Running, EngineState::Paused],
            EngineState::Stopped,
        )
    }

    /// Blocks while paused
    ///
    /// Returns `true` once running, `false` as soon as the engine is no longer
    /// active. Stop is observed within one `poll` interval.
    pub async fn wait_while_paused(&self, poll: Duration) -> bool {
        loop {
            match self.state() {
                EngineState::Running => return true,
                EngineState::Paused => tokio::time::sleep(poll).await,
                EngineState::Idle | EngineState::Stopped => return false,
            }
        }
    }

    /// Resolves once the engine is no longer active
    pub async fn stopped(&self) {
        let mut changes = self.changes.subscribe();
        loop {
            if !self.is_active() {
                return;
            }
            if changes.changed().await.is_err() {
                // Sender lives as long as self
                std::future::pending::<()>().await;
            }
        }
    }

    /// Runs `work` unless the engine stops first
    ///
    /// Returns `None` if a stop arrives before `work` completes; `work` is
    /// dropped at that point. Pausing does not interrupt it.
    pub async fn unless_stopped<F: Future>(&self, work: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.stopped() => None,
            output = work => Some(output),
        }
    }

    /// Sleeps for `duration` in slices of at most `poll`
    ///
    /// Returns `false` early if the engine stops meanwhile. Pausing does not
    /// cut the sleep short.
    pub async fn sleep(&self, duration: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if !self.is_active() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep((deadline - now).min(poll)).await;
        }
    }
}
