//! Tests for the automation state machine, driven one continuation at a time

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::automation::{AutomationEngine, Continuation, ScreenDisposition, Step, StepOutcome};
use crate::config::{AutomationConfig, POSITIVE_BUTTON_ID};
use crate::heuristics::{ConfirmOutcome, DialogKind};
use crate::platforms::{AccessibilityEngine, Notice, NoticeDuration, ScreenEvent};
use crate::session::EngineState;
use crate::signal::{signal_channel, Signal, SignalReceiver, Target};
use crate::tree::{MemoryTree, TreeSnapshot, UiNode};

const SETTINGS: &str = "com.android.settings";

/// Host whose active window is whatever the test put there last
#[derive(Default)]
struct FakeHost {
    screen: Mutex<Option<Arc<MemoryTree>>>,
    notices: Mutex<Vec<Notice>>,
}

impl FakeHost {
    fn show(&self, root: UiNode) -> Arc<MemoryTree> {
        let tree = Arc::new(MemoryTree::new(&root));
        *self.screen.lock().unwrap() = Some(tree.clone());
        tree
    }

    fn blank(&self) {
        *self.screen.lock().unwrap() = None;
    }

    fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

impl AccessibilityEngine for FakeHost {
    fn active_snapshot(&self) -> Option<Arc<dyn TreeSnapshot>> {
        self.screen
            .lock()
            .unwrap()
            .clone()
            .map(|tree| tree as Arc<dyn TreeSnapshot>)
    }

    fn show_notice(&self, notice: &Notice) {
        self.notices.lock().unwrap().push(notice.clone());
    }
}

struct Harness {
    engine: AutomationEngine,
    host: Arc<FakeHost>,
    continuations: mpsc::UnboundedReceiver<Continuation>,
    completions: SignalReceiver,
}

impl Harness {
    fn new() -> Self {
        let host = Arc::new(FakeHost::default());
        let (outbound, completions) = signal_channel();
        let (scheduler, continuations) = mpsc::unbounded_channel();
        let engine = AutomationEngine::new(
            AutomationConfig::default(),
            host.clone(),
            outbound,
            scheduler,
        );
        Self {
            engine,
            host,
            continuations,
            completions,
        }
    }

    /// Wait for the next continuation and check how long it took to come due.
    async fn next_step(&mut self, expected: Step, after: Duration) -> Continuation {
        let start = Instant::now();
        let continuation = self
            .continuations
            .recv()
            .await
            .expect("scheduler channel open");
        let waited = start.elapsed();
        assert_eq!(continuation.step, expected);
        assert!(
            waited >= after && waited < after + Duration::from_millis(50),
            "{expected:?} came due after {waited:?}, expected {after:?}"
        );
        continuation
    }

    fn completion_sent(&mut self) -> bool {
        matches!(self.completions.try_recv(), Ok(Signal::Completion))
    }
}

fn settings_event(host: &FakeHost) -> ScreenEvent {
    ScreenEvent::new(SETTINGS, host.active_snapshot())
}

fn details_with_clear_cache() -> UiNode {
    UiNode::container(vec![
        UiNode::label("App info"),
        UiNode::button("Force stop"),
        UiNode::button("Clear cache"),
    ])
}

fn details_with_storage() -> UiNode {
    UiNode::container(vec![
        UiNode::label("App info"),
        UiNode::container(vec![UiNode::label("Storage"), UiNode::label("31 MB used")])
            .with_clickable(true),
    ])
}

fn cache_dialog() -> UiNode {
    UiNode::container(vec![
        UiNode::label("Delete cached files?"),
        UiNode::button("Cancel"),
        UiNode::button("OK").with_view_id(POSITIVE_BUTTON_ID),
    ])
}

#[tokio::test(start_paused = true)]
async fn test_direct_clear_cache_flow() {
    let mut h = Harness::new();
    h.engine.arm(Target::new("pkg.one"));
    assert_eq!(h.engine.state(), EngineState::Armed);

    let details = h.host.show(details_with_clear_cache());
    assert_eq!(
        h.engine.on_screen_changed(&settings_event(&h.host)),
        ScreenDisposition::Scheduled
    );
    assert_eq!(h.engine.state(), EngineState::Locked);

    let inspect = h.next_step(Step::Inspect, Duration::from_millis(800)).await;
    let outcome = h.engine.on_continuation(inspect);
    assert!(matches!(outcome, StepOutcome::ClickedClearCache { .. }));
    assert_eq!(details.clicked_labels(), vec!["Clear cache".to_string()]);

    let dialog = h.host.show(cache_dialog());
    let confirm = h
        .next_step(Step::ConfirmDialog, Duration::from_millis(600))
        .await;
    match h.engine.on_continuation(confirm) {
        StepOutcome::Confirmation {
            result: ConfirmOutcome::Confirmed { kind, .. },
        } => assert_eq!(kind, DialogKind::CacheOnly),
        other => panic!("Expected the dialog to be confirmed, got {other:?}"),
    }
    assert_eq!(dialog.clicked_labels(), vec!["OK".to_string()]);
    assert!(!h.completion_sent(), "Completion must wait for its own delay");

    // Completion is due 1500ms after the click, 900ms after the confirmation
    let complete = h.next_step(Step::Complete, Duration::from_millis(900)).await;
    assert_eq!(h.engine.on_continuation(complete), StepOutcome::Completed);
    assert!(h.completion_sent());
    assert_eq!(h.engine.state(), EngineState::Idle);
    assert!(h.host.notices().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_storage_drill_down() {
    let mut h = Harness::new();
    h.engine.arm(Target::new("pkg.two"));
    let details = h.host.show(details_with_storage());
    h.engine.on_screen_changed(&settings_event(&h.host));

    let inspect = h.next_step(Step::Inspect, Duration::from_millis(800)).await;
    assert!(matches!(
        h.engine.on_continuation(inspect),
        StepOutcome::OpenedStorage { .. }
    ));
    assert_eq!(details.clicks().len(), 1);

    let storage = h.host.show(UiNode::container(vec![
        UiNode::label("Storage"),
        UiNode::button("Clear storage"),
        UiNode::button("Clear cache"),
    ]));
    let drill = h.next_step(Step::DrillDown, Duration::from_millis(1500)).await;
    assert!(matches!(
        h.engine.on_continuation(drill),
        StepOutcome::ClickedClearCache { .. }
    ));
    assert_eq!(storage.clicked_labels(), vec!["Clear cache".to_string()]);
    assert_eq!(h.engine.state(), EngineState::Locked);
}

#[tokio::test(start_paused = true)]
async fn test_missing_button_shows_notice_and_completes() {
    let mut h = Harness::new();
    h.engine.arm(Target::new("pkg.three"));
    h.host.show(UiNode::container(vec![
        UiNode::label("App info"),
        UiNode::button("Force stop"),
        UiNode::button("Uninstall"),
    ]));
    h.engine.on_screen_changed(&settings_event(&h.host));

    let inspect = h.next_step(Step::Inspect, Duration::from_millis(800)).await;
    assert!(matches!(
        h.engine.on_continuation(inspect),
        StepOutcome::Failed { .. }
    ));
    assert!(h.completion_sent(), "Completion goes out straight away");
    assert_eq!(h.engine.state(), EngineState::Idle);
    assert_eq!(
        h.host.notices(),
        vec![Notice {
            text: "AutoCache couldn't find cache button. Please clear manually.".to_string(),
            duration: NoticeDuration::Long,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_unreadable_storage_screen_is_a_navigation_failure() {
    let mut h = Harness::new();
    h.engine.arm(Target::new("pkg.two"));
    h.host.show(details_with_storage());
    h.engine.on_screen_changed(&settings_event(&h.host));
    let inspect = h.next_step(Step::Inspect, Duration::from_millis(800)).await;
    h.engine.on_continuation(inspect);

    h.host.blank();
    let drill = h.next_step(Step::DrillDown, Duration::from_millis(1500)).await;
    assert!(matches!(
        h.engine.on_continuation(drill),
        StepOutcome::Failed { .. }
    ));
    assert!(h.completion_sent());
    let notices = h.host.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].text, "AutoCache: Screen transition failed.");
    assert_eq!(notices[0].duration, NoticeDuration::Short);
}

#[tokio::test(start_paused = true)]
async fn test_storage_screen_without_clear_cache() {
    let mut h = Harness::new();
    h.engine.arm(Target::new("pkg.two"));
    h.host.show(details_with_storage());
    h.engine.on_screen_changed(&settings_event(&h.host));
    let inspect = h.next_step(Step::Inspect, Duration::from_millis(800)).await;
    h.engine.on_continuation(inspect);

    let storage = h.host.show(UiNode::container(vec![
        UiNode::label("Storage"),
        UiNode::button("Clear storage"),
    ]));
    let drill = h.next_step(Step::DrillDown, Duration::from_millis(1500)).await;
    assert!(matches!(
        h.engine.on_continuation(drill),
        StepOutcome::Failed { .. }
    ));
    assert!(storage.clicks().is_empty(), "Clear storage must not be pressed");
    assert!(h.completion_sent());
    assert_eq!(h.engine.state(), EngineState::Idle);
    assert_eq!(
        h.host.notices(),
        vec![Notice {
            text: "AutoCache couldn't find cache button.".to_string(),
            duration: NoticeDuration::Short,
        }]
    );
    assert!(h.continuations.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_unreadable_tree_releases_lock() {
    let mut h = Harness::new();
    h.engine.arm(Target::new("pkg.one"));
    h.host.show(details_with_clear_cache());
    h.engine.on_screen_changed(&settings_event(&h.host));

    h.host.blank();
    let inspect = h.next_step(Step::Inspect, Duration::from_millis(800)).await;
    assert_eq!(
        h.engine.on_continuation(inspect),
        StepOutcome::SnapshotUnavailable
    );
    assert_eq!(h.engine.state(), EngineState::Armed);
    assert!(!h.completion_sent());

    // The next relevant screen gets a fresh attempt
    h.host.show(details_with_clear_cache());
    assert_eq!(
        h.engine.on_screen_changed(&settings_event(&h.host)),
        ScreenDisposition::Scheduled
    );
}

#[tokio::test(start_paused = true)]
async fn test_single_flight_while_locked() {
    let mut h = Harness::new();
    h.engine.arm(Target::new("pkg.one"));
    h.host.show(details_with_clear_cache());

    assert_eq!(
        h.engine.on_screen_changed(&settings_event(&h.host)),
        ScreenDisposition::Scheduled
    );
    for _ in 0..3 {
        assert_eq!(
            h.engine.on_screen_changed(&settings_event(&h.host)),
            ScreenDisposition::Busy
        );
    }

    let inspect = h.next_step(Step::Inspect, Duration::from_millis(800)).await;
    h.engine.on_continuation(inspect);
    h.host.show(cache_dialog());
    h.next_step(Step::ConfirmDialog, Duration::from_millis(600))
        .await;
    // Exactly one inspection was scheduled
    assert!(h.continuations.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_screen_filtering() {
    let mut h = Harness::new();
    let event = ScreenEvent::new(SETTINGS, None);
    assert_eq!(h.engine.on_screen_changed(&event), ScreenDisposition::NotArmed);

    h.engine.arm(Target::new("pkg.one"));
    let launcher = ScreenEvent::new("com.android.launcher3", h.host.active_snapshot());
    assert_eq!(
        h.engine.on_screen_changed(&launcher),
        ScreenDisposition::IrrelevantSurface
    );
    assert_eq!(
        h.engine.on_screen_changed(&event),
        ScreenDisposition::NoSnapshot
    );
    assert_eq!(h.engine.state(), EngineState::Armed);
}

#[tokio::test(start_paused = true)]
async fn test_expired_window_goes_idle_without_completion() {
    let mut h = Harness::new();
    h.engine.arm(Target::new("pkg.one"));
    h.host.show(details_with_clear_cache());

    tokio::time::advance(Duration::from_millis(16_000)).await;
    assert_eq!(
        h.engine.on_screen_changed(&settings_event(&h.host)),
        ScreenDisposition::Expired
    );
    assert_eq!(h.engine.state(), EngineState::Idle);
    assert!(!h.completion_sent());

    // Re-arming starts a fresh window
    h.engine.arm(Target::new("pkg.one"));
    assert_eq!(
        h.engine.on_screen_changed(&settings_event(&h.host)),
        ScreenDisposition::Scheduled
    );
}

#[tokio::test(start_paused = true)]
async fn test_disarm_makes_pending_steps_stale() {
    let mut h = Harness::new();
    h.engine.arm(Target::new("pkg.one"));
    let details = h.host.show(details_with_clear_cache());
    h.engine.on_screen_changed(&settings_event(&h.host));

    h.engine.handle_signal(Signal::Disarm);
    assert_eq!(h.engine.state(), EngineState::Idle);

    let inspect = h.next_step(Step::Inspect, Duration::from_millis(800)).await;
    assert_eq!(h.engine.on_continuation(inspect), StepOutcome::Stale);
    assert!(details.clicks().is_empty());
    assert!(!h.completion_sent());
}

#[tokio::test(start_paused = true)]
async fn test_disarm_after_click_drops_confirmation_and_completion() {
    let mut h = Harness::new();
    h.engine.arm(Target::new("pkg.one"));
    h.host.show(details_with_clear_cache());
    h.engine.on_screen_changed(&settings_event(&h.host));
    let inspect = h.next_step(Step::Inspect, Duration::from_millis(800)).await;
    assert!(matches!(
        h.engine.on_continuation(inspect),
        StepOutcome::ClickedClearCache { .. }
    ));

    h.engine.handle_signal(Signal::Disarm);
    assert_eq!(h.engine.state(), EngineState::Idle);

    let dialog = h.host.show(cache_dialog());
    let confirm = h
        .next_step(Step::ConfirmDialog, Duration::from_millis(600))
        .await;
    assert_eq!(h.engine.on_continuation(confirm), StepOutcome::Stale);
    let complete = h.next_step(Step::Complete, Duration::from_millis(900)).await;
    assert_eq!(h.engine.on_continuation(complete), StepOutcome::Stale);

    assert!(dialog.clicks().is_empty());
    assert!(!h.completion_sent());
    assert!(h.host.notices().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rearm_supersedes_scheduled_work() {
    let mut h = Harness::new();
    h.engine.arm(Target::new("pkg.one"));
    let details = h.host.show(details_with_clear_cache());
    h.engine.on_screen_changed(&settings_event(&h.host));
    let stale_generation = h.engine.session().map(|s| s.generation);

    h.engine.handle_signal(Signal::arm("pkg.two"));
    assert_eq!(h.engine.target(), Some(&Target::new("pkg.two")));
    assert_eq!(h.engine.state(), EngineState::Armed);
    assert_ne!(h.engine.session().map(|s| s.generation), stale_generation);

    let inspect = h.next_step(Step::Inspect, Duration::from_millis(800)).await;
    assert_eq!(h.engine.on_continuation(inspect), StepOutcome::Stale);
    assert!(details.clicks().is_empty());
}
