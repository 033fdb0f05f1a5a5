//! Messages exchanged between the queue coordinator and the automation engine
//!
//! The transport is left to the host. In-process both sides talk over tokio unbounded
//! channels; across processes the same messages serialize as tagged JSON:
//!
//! ```text
//! {"type":"arm","target":"com.example.app"}
//! {"type":"disarm"}
//! {"type":"completion"}
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc;

use crate::errors::AutomationError;

/// One unit of work: the identifier of the application whose cache gets cleared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Target {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Target {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl FromStr for Target {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(AutomationError::InvalidArgument(
                "target identifier must not be empty".to_string(),
            ));
        }
        Ok(Self::new(trimmed))
    }
}

/// Control and completion messages on the signaling channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    /// Coordinator → engine: watch for this target's settings screen
    Arm { target: Target },
    /// Either side: drop whatever session is active
    Disarm,
    /// Engine → coordinator: the armed target is done, whatever the outcome
    Completion,
}

impl Signal {
    pub fn arm(target: impl Into<Target>) -> Self {
        Signal::Arm {
            target: target.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, AutomationError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(line: &str) -> Result<Self, AutomationError> {
        Ok(serde_json::from_str(line)?)
    }
}

pub type SignalSender = mpsc::UnboundedSender<Signal>;
pub type SignalReceiver = mpsc::UnboundedReceiver<Signal>;

/// One direction of the signaling channel
pub fn signal_channel() -> (SignalSender, SignalReceiver) {
    mpsc::unbounded_channel()
}
