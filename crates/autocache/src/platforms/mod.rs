use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::errors::AutomationError;
use crate::signal::Target;
use crate::tree::TreeSnapshot;

pub mod simulated;

pub use simulated::{Scenario, SimulatedApp, SimulatedDevice};

/// How long a notice should stay on screen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeDuration {
    #[default]
    Short,
    Long,
}

/// Advisory message for the user. Never blocks the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub text: String,
    pub duration: NoticeDuration,
}

impl Notice {
    pub fn short(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            duration: NoticeDuration::Short,
        }
    }

    pub fn long(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            duration: NoticeDuration::Long,
        }
    }
}

/// A screen-change notification from the host.
///
/// `surface` identifies the window or package that changed and only feeds the cheap
/// relevance filter. `snapshot` is the tree at notification time, if the host could read it.
#[derive(Clone)]
pub struct ScreenEvent {
    pub surface: String,
    pub snapshot: Option<Arc<dyn TreeSnapshot>>,
}

impl ScreenEvent {
    pub fn new(surface: impl Into<String>, snapshot: Option<Arc<dyn TreeSnapshot>>) -> Self {
        Self {
            surface: surface.into(),
            snapshot,
        }
    }
}

impl fmt::Debug for ScreenEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScreenEvent")
            .field("surface", &self.surface)
            .field("has_snapshot", &self.snapshot.is_some())
            .finish()
    }
}

/// What the automation engine needs from the host UI framework
pub trait AccessibilityEngine: Send + Sync {
    /// Fresh snapshot of the active window, or `None` when it cannot be read right now
    fn active_snapshot(&self) -> Option<Arc<dyn TreeSnapshot>>;

    /// Surface an advisory message to the user
    fn show_notice(&self, notice: &Notice);
}

/// Brings up the per-application details screen in Settings for a target
#[async_trait::async_trait]
pub trait TargetLauncher: Send + Sync {
    async fn open_target(&self, target: &Target) -> Result<(), AutomationError>;
}
