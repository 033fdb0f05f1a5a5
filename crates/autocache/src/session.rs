//! The armed session: the only mutable state of the automation engine

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

use crate::signal::Target;

/// Externally visible state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// No target armed
    Idle,
    /// Target armed, window open, waiting for a relevant screen
    Armed,
    /// A screen change is being processed
    Locked,
}

/// Everything the engine knows about the target it is working on.
///
/// The value is replaced as a whole on every transition so target, lock and timestamp
/// can never be observed half-updated. `generation` is unique per arm and lets delayed
/// continuations detect that the session they were scheduled for is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmedSession {
    pub target: Target,
    pub armed_at: Instant,
    pub window: Duration,
    pub locked: bool,
    pub generation: u64,
}

impl ArmedSession {
    pub fn new(target: Target, window: Duration, generation: u64) -> Self {
        Self {
            target,
            armed_at: Instant::now(),
            window,
            locked: false,
            generation,
        }
    }

    /// True once strictly more than `window` has passed since arming
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.armed_at) > self.window
    }

    pub fn locked(self) -> Self {
        Self {
            locked: true,
            ..self
        }
    }

    pub fn unlocked(self) -> Self {
        Self {
            locked: false,
            ..self
        }
    }

    pub fn state(&self) -> EngineState {
        if self.locked {
            EngineState::Locked
        } else {
            EngineState::Armed
        }
    }
}
