//! Sequential batch coordinator
//!
//! Arms the automation engine for one target at a time, strictly in the order given,
//! and only moves on when the engine reports completion (or the per-target watchdog
//! gives up on it). All queue mutation happens inside [`QueueCoordinator::run`], so
//! starts, cancels and completions never interleave.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::errors::AutomationError;
use crate::platforms::TargetLauncher;
use crate::signal::{Signal, SignalReceiver, SignalSender, Target};

/// FIFO of targets plus the one currently handed to the engine
#[derive(Debug, Default)]
pub struct BatchQueue {
    queue: VecDeque<Target>,
    pending: Option<Target>,
}

impl BatchQueue {
    /// Replace everything with `targets`, dropping repeats (first occurrence wins).
    /// Returns the number of targets queued.
    pub fn replace(&mut self, targets: impl IntoIterator<Item = Target>) -> usize {
        let mut seen = HashSet::new();
        self.pending = None;
        self.queue = targets
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();
        self.queue.len()
    }

    /// Move the head of the queue into the pending slot.
    pub fn advance(&mut self) -> Option<Target> {
        self.pending = self.queue.pop_front();
        self.pending.clone()
    }

    /// Clear the pending slot, returning what was in it.
    pub fn finish_pending(&mut self) -> Option<Target> {
        self.pending.take()
    }

    pub fn clear(&mut self) -> usize {
        let dropped = self.queue.len() + usize::from(self.pending.is_some());
        self.queue.clear();
        self.pending = None;
        dropped
    }

    pub fn pending(&self) -> Option<&Target> {
        self.pending.as_ref()
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_none() && self.queue.is_empty()
    }
}

/// Final account of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub total: usize,
    /// Targets the engine reported complete, in order
    pub completed: Vec<Target>,
    /// Targets abandoned because they could not be launched or never completed
    pub skipped: Vec<Target>,
    pub elapsed_ms: u64,
}

/// Progress notifications for the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    Started {
        batch_id: Uuid,
        total: usize,
    },
    TargetArmed {
        batch_id: Uuid,
        target: Target,
        /// 1-based
        position: usize,
        total: usize,
    },
    TargetCompleted {
        batch_id: Uuid,
        target: Target,
    },
    TargetSkipped {
        batch_id: Uuid,
        target: Target,
        reason: String,
    },
    Finished {
        summary: BatchSummary,
    },
    Cancelled {
        batch_id: Uuid,
        /// Targets that were still queued or pending
        dropped: usize,
    },
}

pub type BatchEventSender = mpsc::UnboundedSender<BatchEvent>;
pub type BatchEventReceiver = mpsc::UnboundedReceiver<BatchEvent>;

#[derive(Debug)]
struct BatchProgress {
    id: Uuid,
    started: Instant,
    total: usize,
    position: usize,
    completed: Vec<Target>,
    skipped: Vec<Target>,
}

impl BatchProgress {
    fn new(total: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            started: Instant::now(),
            total,
            position: 0,
            completed: Vec::new(),
            skipped: Vec::new(),
        }
    }

    fn summary(self) -> BatchSummary {
        BatchSummary {
            batch_id: self.id,
            total: self.total,
            completed: self.completed,
            skipped: self.skipped,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Caller requests delivered to the coordinator loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorCommand {
    Start(Vec<Target>),
    Cancel,
}

/// Drives a batch through the automation engine one target at a time
pub struct QueueCoordinator {
    config: QueueConfig,
    queue: BatchQueue,
    engine: SignalSender,
    launcher: Arc<dyn TargetLauncher>,
    events: BatchEventSender,
    batch: Option<BatchProgress>,
    deadline: Option<Instant>,
}

impl QueueCoordinator {
    /// `engine` carries arm/disarm signals to the automation engine.
    pub fn new(
        config: QueueConfig,
        engine: SignalSender,
        launcher: Arc<dyn TargetLauncher>,
        events: BatchEventSender,
    ) -> Self {
        Self {
            config,
            queue: BatchQueue::default(),
            engine,
            launcher,
            events,
            batch: None,
            deadline: None,
        }
    }

    pub fn queue(&self) -> &BatchQueue {
        &self.queue
    }

    /// Replace any in-flight batch and arm the first target.
    #[instrument(skip(self, targets), fields(count = targets.len()))]
    pub async fn start(&mut self, targets: Vec<Target>) {
        if self.batch.is_some() {
            info!("New batch replaces the one in flight");
            self.cancel();
        }

        let total = self.queue.replace(targets);
        let progress = BatchProgress::new(total);
        info!("Starting batch {} with {total} target(s)", progress.id);
        self.emit(BatchEvent::Started {
            batch_id: progress.id,
            total,
        });
        self.batch = Some(progress);
        self.arm_next().await;
    }

    /// Drop the queue and tell the engine to stand down.
    pub fn cancel(&mut self) {
        let dropped = self.queue.clear();
        self.deadline = None;
        self.send_to_engine(Signal::Disarm);
        if let Some(progress) = self.batch.take() {
            info!("Cancelled batch {} ({dropped} target(s) dropped)", progress.id);
            self.emit(BatchEvent::Cancelled {
                batch_id: progress.id,
                dropped,
            });
        }
    }

    /// The engine finished the pending target.
    pub async fn on_completion(&mut self) {
        let Some(target) = self.queue.finish_pending() else {
            debug!("Ignoring completion with no target pending");
            return;
        };
        self.deadline = None;
        info!("{target} completed");
        if let Some(progress) = self.batch.as_mut() {
            progress.completed.push(target.clone());
            let batch_id = progress.id;
            self.emit(BatchEvent::TargetCompleted { batch_id, target });
        }
        self.arm_next().await;
    }

    /// The pending target ran past its deadline without completing.
    async fn on_deadline(&mut self) {
        self.deadline = None;
        let Some(target) = self.queue.finish_pending() else {
            return;
        };
        warn!("{target} did not complete in time; moving on");
        self.send_to_engine(Signal::Disarm);
        self.skip(target, "no completion before the deadline".to_string());
        self.arm_next().await;
    }

    /// Arm targets until one launches or the queue runs dry.
    async fn arm_next(&mut self) {
        while let Some(target) = self.queue.advance() {
            let Some(progress) = self.batch.as_mut() else {
                return;
            };
            progress.position += 1;
            let event = BatchEvent::TargetArmed {
                batch_id: progress.id,
                target: target.clone(),
                position: progress.position,
                total: progress.total,
            };

            self.send_to_engine(Signal::Arm {
                target: target.clone(),
            });
            self.emit(event);

            match self.launcher.open_target(&target).await {
                Ok(()) => {
                    self.deadline = self.config.target_timeout().map(|t| Instant::now() + t);
                    return;
                }
                Err(err) => {
                    warn!("Could not open settings for {target}: {err}");
                    self.queue.finish_pending();
                    self.send_to_engine(Signal::Disarm);
                    self.skip(target, err.to_string());
                }
            }
        }
        self.finish();
    }

    fn finish(&mut self) {
        self.deadline = None;
        if let Some(progress) = self.batch.take() {
            let summary = progress.summary();
            info!(
                "Batch {} finished: {} completed, {} skipped",
                summary.batch_id,
                summary.completed.len(),
                summary.skipped.len()
            );
            self.emit(BatchEvent::Finished { summary });
        }
    }

    fn skip(&mut self, target: Target, reason: String) {
        if let Some(progress) = self.batch.as_mut() {
            progress.skipped.push(target.clone());
            let batch_id = progress.id;
            self.emit(BatchEvent::TargetSkipped {
                batch_id,
                target,
                reason,
            });
        }
    }

    fn send_to_engine(&self, signal: Signal) {
        if self.engine.send(signal).is_err() {
            warn!("Automation engine is gone; signal dropped");
        }
    }

    fn emit(&self, event: BatchEvent) {
        if self.events.send(event).is_err() {
            debug!("No listener for batch events");
        }
    }

    /// Process caller commands, completion signals and the watchdog until `shutdown`.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<CoordinatorCommand>,
        mut completions: SignalReceiver,
        shutdown: CancellationToken,
    ) {
        debug!("Queue coordinator loop started");
        loop {
            let deadline = self.deadline;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(command) = commands.recv() => match command {
                    CoordinatorCommand::Start(targets) => self.start(targets).await,
                    CoordinatorCommand::Cancel => self.cancel(),
                },
                Some(signal) = completions.recv() => match signal {
                    Signal::Completion => self.on_completion().await,
                    Signal::Disarm => {
                        debug!("Engine disarmed itself; waiting for watchdog or completion")
                    }
                    Signal::Arm { target } => warn!("Unexpected arm for {target} on completion channel"),
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_deadline().await;
                }
                else => break,
            }
        }
        debug!("Queue coordinator loop stopped");
    }

    pub fn spawn(
        self,
        commands: mpsc::UnboundedReceiver<CoordinatorCommand>,
        completions: SignalReceiver,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(commands, completions, shutdown))
    }
}

/// Caller-side handle to a running coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::UnboundedSender<CoordinatorCommand>,
}

impl CoordinatorHandle {
    pub fn new(commands: mpsc::UnboundedSender<CoordinatorCommand>) -> Self {
        Self { commands }
    }

    /// Queue a new batch. Returns immediately.
    pub fn start<I, T>(&self, targets: I) -> Result<(), AutomationError>
    where
        I: IntoIterator<Item = T>,
        T: Into<Target>,
    {
        let targets = targets.into_iter().map(Into::into).collect();
        self.send(CoordinatorCommand::Start(targets))
    }

    pub fn cancel(&self) -> Result<(), AutomationError> {
        self.send(CoordinatorCommand::Cancel)
    }

    fn send(&self, command: CoordinatorCommand) -> Result<(), AutomationError> {
        self.commands
            .send(command)
            .map_err(|_| AutomationError::ChannelClosed("queue coordinator".to_string()))
    }
}

/// Create a coordinator command channel and the handle that feeds it
pub fn coordinator_channel() -> (CoordinatorHandle, mpsc::UnboundedReceiver<CoordinatorCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CoordinatorHandle::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(ids: &[&str]) -> Vec<Target> {
        ids.iter().map(|id| Target::new(*id)).collect()
    }

    #[test]
    fn test_replace_drops_duplicates_keeping_first() {
        let mut queue = BatchQueue::default();
        let count = queue.replace(targets(&["a", "b", "a", "c", "b"]));
        assert_eq!(count, 3);
        assert_eq!(queue.advance(), Some(Target::new("a")));
        assert_eq!(queue.advance(), Some(Target::new("b")));
        assert_eq!(queue.advance(), Some(Target::new("c")));
        assert_eq!(queue.advance(), None);
    }

    #[test]
    fn test_pending_slot() {
        let mut queue = BatchQueue::default();
        queue.replace(targets(&["a", "b"]));
        assert!(queue.pending().is_none());
        queue.advance();
        assert_eq!(queue.pending(), Some(&Target::new("a")));
        assert_eq!(queue.remaining(), 1);
        assert_eq!(queue.finish_pending(), Some(Target::new("a")));
        assert_eq!(queue.finish_pending(), None);
        assert!(!queue.is_idle());
    }

    #[test]
    fn test_clear_counts_pending() {
        let mut queue = BatchQueue::default();
        queue.replace(targets(&["a", "b", "c"]));
        queue.advance();
        assert_eq!(queue.clear(), 3);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_batch_event_wire_format() {
        let event = BatchEvent::TargetSkipped {
            batch_id: Uuid::nil(),
            target: Target::new("pkg.one"),
            reason: "launch failed".to_string(),
        };
        let json = serde_json::to_value(&event).expect("Should serialize");
        assert_eq!(json["type"], "target_skipped");
        assert_eq!(json["target"], "pkg.one");
    }
}
