//! Error types for cache-clearing automation

use thiserror::Error;

/// Errors surfaced by the automation engine, the queue coordinator and the hosts they drive.
///
/// Inside the engine loop none of these are fatal: the failures that reach the user are
/// turned into a [`Notice`](crate::platforms::Notice) and the session still completes.
#[derive(Debug, Error)]
pub enum AutomationError {
    /// Neither a direct clear-cache control nor a storage entry could be located
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// The storage screen opened but carries no clear-cache control
    #[error("Clear cache control not found: {0}")]
    ClearCacheMissing(String),

    /// The storage entry was clicked but the following screen could not be read
    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    /// The host could not bring up the details screen for a target
    #[error("Failed to launch target '{target}': {reason}")]
    LaunchFailed { target: String, reason: String },

    /// The other end of a signaling channel has gone away
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl AutomationError {
    /// Text shown to the user when this failure ends a session early.
    pub fn notice_text(&self) -> String {
        match self {
            AutomationError::ElementNotFound(_) => {
                "AutoCache couldn't find cache button. Please clear manually.".to_string()
            }
            AutomationError::ClearCacheMissing(_) => {
                "AutoCache couldn't find cache button.".to_string()
            }
            AutomationError::NavigationFailed(_) => {
                "AutoCache: Screen transition failed.".to_string()
            }
            other => format!("AutoCache: {other}"),
        }
    }
}
