//! The automation state machine
//!
//! One [`AutomationEngine`] watches for the Settings screen of exactly one armed target,
//! runs the locate-and-click sequence once, and reports completion on the signaling
//! channel. It never blocks: every wait is a [`Continuation`] scheduled on a timer and
//! delivered back through the engine's own event loop ([`AutomationService::run`]), where
//! it is checked against the current session before anything happens.
//!
//! ```text
//!            Arm                 relevant screen           debounce elapsed
//!   Idle ───────────► Armed ───────────────────► Locked ─────────────────► inspect
//!    ▲                  ▲  (window expired → Idle)           │
//!    │                  └──── snapshot unavailable ──────────┤
//!    └──────────── Completion (every other exit) ────────────┘
//! ```

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::AutomationConfig;
use crate::errors::AutomationError;
use crate::heuristics::{click_by_labels, confirm_if_safe, ConfirmOutcome, LabelMatch};
use crate::platforms::{AccessibilityEngine, Notice, NoticeDuration, ScreenEvent};
use crate::session::{ArmedSession, EngineState};
use crate::signal::{Signal, SignalReceiver, SignalSender, Target};
use crate::utils::surface_matches;

/// The work a delayed continuation performs once its timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// First look at the tree after the debounce
    Inspect,
    /// Look for the clear-cache control on the storage sub-screen
    DrillDown,
    /// Run the confirmation dialog safety check
    ConfirmDialog,
    /// Emit the completion signal
    Complete,
}

/// A step bound to the session generation it was scheduled for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Continuation {
    pub generation: u64,
    pub step: Step,
}

/// What the engine did with a screen-change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenDisposition {
    /// Nothing armed
    NotArmed,
    /// Another notification is being processed
    Busy,
    /// The window closed before a relevant screen appeared; session dropped silently
    Expired,
    /// Not the Settings surface
    IrrelevantSurface,
    /// The host delivered no tree with the notification
    NoSnapshot,
    /// Locked, inspection scheduled after the debounce
    Scheduled,
}

/// What a continuation did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    /// The session it was scheduled for no longer exists
    Stale,
    /// The tree could not be read; lock released (or nothing to confirm)
    SnapshotUnavailable,
    ClickedClearCache { hit: LabelMatch },
    OpenedStorage { hit: LabelMatch },
    Confirmation { result: ConfirmOutcome },
    /// A notice was shown and the session completed early
    Failed { reason: String },
    Completed,
}

/// State machine for a single armed target
pub struct AutomationEngine {
    config: AutomationConfig,
    host: Arc<dyn AccessibilityEngine>,
    outbound: SignalSender,
    scheduler: mpsc::UnboundedSender<Continuation>,
    session: Option<ArmedSession>,
    generation: u64,
}

impl AutomationEngine {
    pub fn new(
        config: AutomationConfig,
        host: Arc<dyn AccessibilityEngine>,
        outbound: SignalSender,
        scheduler: mpsc::UnboundedSender<Continuation>,
    ) -> Self {
        Self {
            config,
            host,
            outbound,
            scheduler,
            session: None,
            generation: 0,
        }
    }

    pub fn config(&self) -> &AutomationConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.session
            .as_ref()
            .map_or(EngineState::Idle, ArmedSession::state)
    }

    pub fn target(&self) -> Option<&Target> {
        self.session.as_ref().map(|s| &s.target)
    }

    pub fn session(&self) -> Option<&ArmedSession> {
        self.session.as_ref()
    }

    /// Start watching for `target`, replacing any existing session.
    #[instrument(level = "debug", skip(self, target), fields(target = %target))]
    pub fn arm(&mut self, target: Target) {
        self.generation += 1;
        if let Some(previous) = self.session.take() {
            debug!("Replacing session for {}", previous.target);
        }
        info!("Armed for {target} ({:?} window)", self.config.window());
        self.session = Some(ArmedSession::new(
            target,
            self.config.window(),
            self.generation,
        ));
    }

    /// Drop the current session. Pending continuations become no-ops.
    pub fn disarm(&mut self) {
        if let Some(session) = self.session.take() {
            info!("Disarmed {}", session.target);
        }
    }

    pub fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Arm { target } => self.arm(target),
            Signal::Disarm => self.disarm(),
            Signal::Completion => debug!("Ignoring completion signal addressed to the engine"),
        }
    }

    #[instrument(level = "debug", skip(self, event), fields(surface = %event.surface))]
    pub fn on_screen_changed(&mut self, event: &ScreenEvent) -> ScreenDisposition {
        let Some(session) = self.session.as_ref() else {
            return ScreenDisposition::NotArmed;
        };
        if session.locked {
            debug!("Dropping notification while locked");
            return ScreenDisposition::Busy;
        }
        if session.is_expired_at(Instant::now()) {
            info!(
                "Window for {} expired before a relevant screen appeared",
                session.target
            );
            self.session = None;
            return ScreenDisposition::Expired;
        }
        if !surface_matches(&event.surface, &self.config.surface_filter) {
            return ScreenDisposition::IrrelevantSurface;
        }
        if event.snapshot.is_none() {
            return ScreenDisposition::NoSnapshot;
        }

        let Some(locked) = self.session.take().map(ArmedSession::locked) else {
            return ScreenDisposition::NotArmed;
        };
        let generation = locked.generation;
        debug!("Locked for {}, inspecting after debounce", locked.target);
        self.session = Some(locked);
        self.schedule(generation, Step::Inspect, self.config.debounce());
        ScreenDisposition::Scheduled
    }

    pub fn on_continuation(&mut self, continuation: Continuation) -> StepOutcome {
        let current = self.session.as_ref().map(|s| s.generation);
        if current != Some(continuation.generation) {
            debug!(
                "Dropping stale {:?} (scheduled for generation {}, current {:?})",
                continuation.step, continuation.generation, current
            );
            return StepOutcome::Stale;
        }

        let generation = continuation.generation;
        match continuation.step {
            Step::Inspect => self.inspect(generation),
            Step::DrillDown => self.drill_down(generation),
            Step::ConfirmDialog => self.confirm_dialog(),
            Step::Complete => self.complete(),
        }
    }

    fn inspect(&mut self, generation: u64) -> StepOutcome {
        let Some(snapshot) = self.host.active_snapshot() else {
            debug!("Snapshot unavailable after debounce; releasing lock");
            self.session = self.session.take().map(ArmedSession::unlocked);
            return StepOutcome::SnapshotUnavailable;
        };

        let labels = &self.config.labels;
        if let Some(hit) = click_by_labels(snapshot.as_ref(), &labels.clear_cache) {
            info!("Clicked '{}' on the details screen", hit.label);
            self.schedule_confirmation(generation);
            return StepOutcome::ClickedClearCache { hit };
        }

        if let Some(hit) = click_by_labels(snapshot.as_ref(), &labels.storage) {
            info!("Clicked '{}', waiting for the storage screen", hit.label);
            self.schedule(generation, Step::DrillDown, self.config.navigation_delay());
            return StepOutcome::OpenedStorage { hit };
        }

        self.fail(
            AutomationError::ElementNotFound(
                "no clear-cache control or storage entry on screen".to_string(),
            ),
            NoticeDuration::Long,
        )
    }

    fn drill_down(&mut self, generation: u64) -> StepOutcome {
        let Some(snapshot) = self.host.active_snapshot() else {
            return self.fail(
                AutomationError::NavigationFailed(
                    "storage screen could not be read".to_string(),
                ),
                NoticeDuration::Short,
            );
        };

        match click_by_labels(snapshot.as_ref(), &self.config.labels.clear_cache) {
            Some(hit) => {
                info!("Clicked '{}' on the storage screen", hit.label);
                self.schedule_confirmation(generation);
                StepOutcome::ClickedClearCache { hit }
            }
            None => self.fail(
                AutomationError::ClearCacheMissing(
                    "no clear-cache control on the storage screen".to_string(),
                ),
                NoticeDuration::Short,
            ),
        }
    }

    fn confirm_dialog(&mut self) -> StepOutcome {
        let Some(snapshot) = self.host.active_snapshot() else {
            debug!("No tree to check for a confirmation dialog");
            return StepOutcome::SnapshotUnavailable;
        };
        let result = confirm_if_safe(snapshot.as_ref(), &self.config.labels);
        match &result {
            ConfirmOutcome::Confirmed { kind, .. } => info!("Confirmed {kind:?} dialog"),
            ConfirmOutcome::Abstained { candidates } => {
                info!("Left dialog open: {candidates} candidate(s), none safe to confirm")
            }
            ConfirmOutcome::NoCandidates => debug!("No confirmation dialog on screen"),
        }
        StepOutcome::Confirmation { result }
    }

    fn complete(&mut self) -> StepOutcome {
        if let Some(session) = self.session.take() {
            let elapsed = Instant::now().saturating_duration_since(session.armed_at);
            info!("Completed {} after {elapsed:?}", session.target);
            if self.outbound.send(Signal::Completion).is_err() {
                warn!("Completion for {} dropped: coordinator is gone", session.target);
            }
        }
        StepOutcome::Completed
    }

    /// Surface the failure and finish the session so the batch keeps moving.
    fn fail(&mut self, error: AutomationError, duration: NoticeDuration) -> StepOutcome {
        let target = self.target().map(ToString::to_string).unwrap_or_default();
        warn!("Giving up on {target}: {error}");
        self.host.show_notice(&Notice {
            text: error.notice_text(),
            duration,
        });
        self.complete();
        StepOutcome::Failed {
            reason: error.to_string(),
        }
    }

    fn schedule_confirmation(&self, generation: u64) {
        self.schedule(generation, Step::ConfirmDialog, self.config.confirm_delay());
        self.schedule(generation, Step::Complete, self.config.completion_delay());
    }

    fn schedule(&self, generation: u64, step: Step, delay: Duration) {
        let scheduler = self.scheduler.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The receiver only goes away when the engine loop has shut down
            let _ = scheduler.send(Continuation { generation, step });
        });
    }
}

pub type ScreenSender = mpsc::UnboundedSender<ScreenEvent>;
pub type ScreenReceiver = mpsc::UnboundedReceiver<ScreenEvent>;

/// Channel carrying screen-change notifications from the host to the engine
pub fn screen_channel() -> (ScreenSender, ScreenReceiver) {
    mpsc::unbounded_channel()
}

/// Event loop owning an [`AutomationEngine`]
pub struct AutomationService {
    engine: AutomationEngine,
    continuations: mpsc::UnboundedReceiver<Continuation>,
}

impl AutomationService {
    /// `outbound` is where completion signals go.
    pub fn new(
        config: AutomationConfig,
        host: Arc<dyn AccessibilityEngine>,
        outbound: SignalSender,
    ) -> Self {
        let (scheduler, continuations) = mpsc::unbounded_channel();
        Self {
            engine: AutomationEngine::new(config, host, outbound, scheduler),
            continuations,
        }
    }

    pub fn engine(&self) -> &AutomationEngine {
        &self.engine
    }

    /// Process control signals, screen changes and due continuations until `shutdown`
    /// fires. Control signals are looked at first so a disarm always wins over work
    /// that became due at the same moment.
    pub async fn run(
        mut self,
        mut signals: SignalReceiver,
        mut screens: ScreenReceiver,
        shutdown: CancellationToken,
    ) {
        debug!("Automation engine loop started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(signal) = signals.recv() => self.engine.handle_signal(signal),
                Some(continuation) = self.continuations.recv() => {
                    self.engine.on_continuation(continuation);
                }
                Some(event) = screens.recv() => {
                    let disposition = self.engine.on_screen_changed(&event);
                    debug!("Screen change from {}: {disposition:?}", event.surface);
                }
                else => break,
            }
        }
        debug!("Automation engine loop stopped");
    }

    pub fn spawn(
        self,
        signals: SignalReceiver,
        screens: ScreenReceiver,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(signals, screens, shutdown))
    }
}
