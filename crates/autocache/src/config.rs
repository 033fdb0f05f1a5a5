//! Tunables for the automation engine and the queue coordinator
//!
//! Every field has a default matching the behaviour tuned against stock and emulator
//! Settings builds, so an empty file (or no file at all) is a valid configuration.
//! Durations are milliseconds.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::AutomationError;

/// Candidate labels for the clear-cache control, most specific first
pub const CLEAR_CACHE_LABELS: &[&str] = &[
    "Clear cache",
    "Clear cache data",
    "Clear Cache",
    "Clear app cache",
];

/// Entries that lead from App info to the storage sub-screen
pub const STORAGE_LABELS: &[&str] = &[
    "Storage",
    "Storage & cache",
    "Storage usage",
    "Storage & data",
];

/// Affirmative dialog buttons
pub const CONFIRM_LABELS: &[&str] = &["OK", "Ok", "ok", "Confirm", "Yes", "Clear"];

/// View id of the positive button in platform alert dialogs
pub const POSITIVE_BUTTON_ID: &str = "android:id/button1";

fn owned(labels: &[&str]) -> Vec<String> {
    labels.iter().map(|s| s.to_string()).collect()
}

/// Ordered label lists the heuristics search for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelSet {
    pub clear_cache: Vec<String>,
    pub storage: Vec<String>,
    pub confirm: Vec<String>,
    pub positive_button_ids: Vec<String>,
}

impl Default for LabelSet {
    fn default() -> Self {
        Self {
            clear_cache: owned(CLEAR_CACHE_LABELS),
            storage: owned(STORAGE_LABELS),
            confirm: owned(CONFIRM_LABELS),
            positive_button_ids: vec![POSITIVE_BUTTON_ID.to_string()],
        }
    }
}

/// Timing and matching parameters of the automation engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// How long an armed session keeps reacting to screen changes
    pub window_ms: u64,
    /// Wait between a relevant notification and the first tree inspection
    pub debounce_ms: u64,
    /// Wait between the clear-cache click and the confirmation dialog check
    pub confirm_delay_ms: u64,
    /// Wait between the clear-cache click and the completion signal
    pub completion_delay_ms: u64,
    /// Wait after clicking the storage entry before inspecting the sub-screen
    pub navigation_delay_ms: u64,
    /// Substring a notification's surface identifier must contain (case-insensitive)
    pub surface_filter: String,
    pub labels: LabelSet,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            window_ms: 15_000,
            debounce_ms: 800,
            confirm_delay_ms: 600,
            completion_delay_ms: 1_500,
            navigation_delay_ms: 1_500,
            surface_filter: "settings".to_string(),
            labels: LabelSet::default(),
        }
    }
}

impl AutomationConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn confirm_delay(&self) -> Duration {
        Duration::from_millis(self.confirm_delay_ms)
    }

    pub fn completion_delay(&self) -> Duration {
        Duration::from_millis(self.completion_delay_ms)
    }

    pub fn navigation_delay(&self) -> Duration {
        Duration::from_millis(self.navigation_delay_ms)
    }

    /// Upper bound on how long one armed target can take: the full window, then the
    /// debounce, the storage navigation and the completion delay of a late attempt.
    pub fn longest_session(&self) -> Duration {
        Duration::from_millis(
            self.window_ms
                .saturating_add(self.debounce_ms)
                .saturating_add(self.navigation_delay_ms)
                .saturating_add(self.completion_delay_ms),
        )
    }

    pub fn validate(&self) -> Result<(), AutomationError> {
        if self.window_ms == 0 {
            return Err(AutomationError::InvalidConfig(
                "window_ms must be greater than zero".to_string(),
            ));
        }
        if self.completion_delay_ms < self.confirm_delay_ms {
            return Err(AutomationError::InvalidConfig(format!(
                "completion_delay_ms ({}) must not be shorter than confirm_delay_ms ({})",
                self.completion_delay_ms, self.confirm_delay_ms
            )));
        }
        if self.surface_filter.trim().is_empty() {
            return Err(AutomationError::InvalidConfig(
                "surface_filter must not be empty".to_string(),
            ));
        }
        for (name, list) in [
            ("labels.clear_cache", &self.labels.clear_cache),
            ("labels.storage", &self.labels.storage),
        ] {
            if list.iter().all(|l| l.trim().is_empty()) {
                return Err(AutomationError::InvalidConfig(format!(
                    "{name} needs at least one non-empty label"
                )));
            }
        }
        Ok(())
    }
}

/// Parameters of the queue coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Give up on a target that has not completed after this long. `None` waits forever.
    pub target_timeout_ms: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            target_timeout_ms: Some(20_000),
        }
    }
}

impl QueueConfig {
    pub fn target_timeout(&self) -> Option<Duration> {
        self.target_timeout_ms.map(Duration::from_millis)
    }
}

/// Complete configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoCacheConfig {
    pub automation: AutomationConfig,
    pub queue: QueueConfig,
}

impl AutoCacheConfig {
    /// Load from a `.json`, `.yaml` or `.yml` file and validate it.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AutomationError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&raw)?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&raw)?,
            other => {
                return Err(AutomationError::InvalidConfig(format!(
                    "unsupported config extension {other:?} for {}",
                    path.display()
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AutomationError> {
        self.automation.validate()?;
        if let Some(timeout) = self.queue.target_timeout() {
            // A shorter watchdog would disarm a target between its click and its completion
            let longest = self.automation.longest_session();
            if timeout < longest {
                return Err(AutomationError::InvalidConfig(format!(
                    "queue.target_timeout_ms ({}) must be at least window_ms + debounce_ms + \
                     navigation_delay_ms + completion_delay_ms ({})",
                    timeout.as_millis(),
                    longest.as_millis()
                )));
            }
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String, AutomationError> {
        Ok(serde_yaml::to_string(self)?)
    }
}
