//! Cache clearing through the system Settings screens
//!
//! An accessibility-driven automation: the [`automation`] engine waits for the details
//! screen of one armed application, clicks its way to "Clear cache", confirms the
//! dialog only when it is safe to, and reports back. The [`queue`] coordinator feeds it
//! one target at a time. [`CacheCleaner`] wires the two together.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

pub mod automation;
pub mod config;
pub mod errors;
pub mod heuristics;
pub mod platforms;
pub mod queue;
pub mod session;
pub mod signal;
#[cfg(test)]
mod tests;
pub mod tree;
pub mod utils;

pub use automation::{
    screen_channel, AutomationEngine, AutomationService, Continuation, ScreenDisposition,
    ScreenReceiver, ScreenSender, Step, StepOutcome,
};
pub use config::{AutoCacheConfig, AutomationConfig, LabelSet, QueueConfig};
pub use errors::AutomationError;
pub use heuristics::{
    classify_dialog, confirm_if_safe, positive_candidates, ConfirmOutcome, DialogKind,
    DialogMentions,
};
pub use platforms::{
    AccessibilityEngine, Notice, NoticeDuration, Scenario, ScreenEvent, SimulatedApp,
    SimulatedDevice, TargetLauncher,
};
pub use queue::{BatchEvent, BatchEventReceiver, BatchSummary, CoordinatorHandle};
pub use session::EngineState;
pub use signal::{Signal, Target};
pub use tokio_util::sync::CancellationToken;
pub use tree::{MemoryTree, NodeId, TreeSnapshot, UiNode};

/// A running automation engine plus the coordinator that feeds it.
pub struct CacheCleaner {
    coordinator: CoordinatorHandle,
    events: Option<BatchEventReceiver>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl CacheCleaner {
    /// Validate `config` and spawn both event loops on the current runtime.
    ///
    /// `screens` must be the receiving end of the channel the host reports screen
    /// changes on.
    #[instrument(skip_all)]
    pub fn spawn(
        config: AutoCacheConfig,
        host: Arc<dyn AccessibilityEngine>,
        launcher: Arc<dyn TargetLauncher>,
        screens: ScreenReceiver,
    ) -> Result<Self, AutomationError> {
        config.validate()?;

        let shutdown = CancellationToken::new();
        let (control_tx, control_rx) = signal::signal_channel();
        let (completion_tx, completion_rx) = signal::signal_channel();
        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        let (coordinator, commands) = queue::coordinator_channel();

        let service = AutomationService::new(config.automation, host, completion_tx);
        let engine_task = service.spawn(control_rx, screens, shutdown.child_token());

        let queue_task = queue::QueueCoordinator::new(config.queue, control_tx, launcher, events_tx)
            .spawn(commands, completion_rx, shutdown.child_token());

        info!("Cache cleaner started");
        Ok(Self {
            coordinator,
            events: Some(events_rx),
            shutdown,
            tasks: vec![engine_task, queue_task],
        })
    }

    /// Replace whatever batch is running with `targets`.
    pub fn start<I, T>(&self, targets: I) -> Result<(), AutomationError>
    where
        I: IntoIterator<Item = T>,
        T: Into<Target>,
    {
        self.coordinator.start(targets)
    }

    pub fn cancel(&self) -> Result<(), AutomationError> {
        self.coordinator.cancel()
    }

    pub fn handle(&self) -> CoordinatorHandle {
        self.coordinator.clone()
    }

    /// Take the batch event stream. Only the first call gets it.
    pub fn take_events(&mut self) -> Option<BatchEventReceiver> {
        self.events.take()
    }

    /// Wait for the next batch event, unless the stream was taken.
    pub async fn next_event(&mut self) -> Option<BatchEvent> {
        self.events.as_mut()?.recv().await
    }

    /// Wait until the current batch finishes or is cancelled.
    pub async fn wait_for_batch(&mut self) -> Option<BatchEvent> {
        while let Some(event) = self.next_event().await {
            if matches!(
                event,
                BatchEvent::Finished { .. } | BatchEvent::Cancelled { .. }
            ) {
                return Some(event);
            }
        }
        None
    }

    /// Stop both loops and wait for them to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                debug!("Task ended abnormally: {err}");
            }
        }
        info!("Cache cleaner stopped");
    }
}
