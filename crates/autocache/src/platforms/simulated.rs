//! Scripted Settings host
//!
//! Plays back a [`Scenario`]: each target has a set of named screens described as
//! [`UiNode`] trees, and clicking a node marked with `opens` switches to that screen and
//! emits a screen-change notification, the way the real framework would.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::{AccessibilityEngine, Notice, ScreenEvent, TargetLauncher};
use crate::automation::ScreenSender;
use crate::errors::AutomationError;
use crate::signal::Target;
use crate::tree::{MemoryTree, NodeId, TreeSnapshot, UiNode};

pub const DEFAULT_SURFACE: &str = "com.android.settings";

fn default_surface() -> String {
    DEFAULT_SURFACE.to_string()
}

/// Screens of one application's Settings pages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulatedApp {
    /// Screen shown when the details page is opened
    pub entry: String,
    pub screens: BTreeMap<String, UiNode>,
}

impl SimulatedApp {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            screens: BTreeMap::new(),
        }
    }

    pub fn with_screen(mut self, name: impl Into<String>, root: UiNode) -> Self {
        self.screens.insert(name.into(), root);
        self
    }
}

/// A scripted device: which apps exist and what their Settings screens look like
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Surface identifier attached to every notification
    #[serde(default = "default_surface")]
    pub surface: String,
    #[serde(default)]
    pub apps: BTreeMap<String, SimulatedApp>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            surface: default_surface(),
            apps: BTreeMap::new(),
        }
    }
}

impl Scenario {
    pub fn with_app(mut self, target: impl Into<String>, app: SimulatedApp) -> Self {
        self.apps.insert(target.into(), app);
        self
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AutomationError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let scenario: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&raw)?,
            _ => serde_yaml::from_str(&raw)?,
        };
        scenario.validate()?;
        Ok(scenario)
    }

    /// Every app's entry screen and every `opens` reference must name a defined screen.
    pub fn validate(&self) -> Result<(), AutomationError> {
        for (target, app) in &self.apps {
            if !app.screens.contains_key(&app.entry) {
                return Err(AutomationError::InvalidConfig(format!(
                    "{target}: entry screen '{}' is not defined",
                    app.entry
                )));
            }
            for (name, root) in &app.screens {
                let mut pending = vec![root];
                while let Some(node) = pending.pop() {
                    if let Some(next) = &node.opens {
                        if !app.screens.contains_key(next) {
                            return Err(AutomationError::InvalidConfig(format!(
                                "{target}: screen '{name}' opens undefined screen '{next}'"
                            )));
                        }
                    }
                    pending.extend(node.children.iter());
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Foreground {
    app: Option<Target>,
    screen: Option<String>,
    tree: Option<Arc<MemoryTree>>,
}

struct DeviceInner {
    scenario: Scenario,
    screens: ScreenSender,
    foreground: Mutex<Foreground>,
    notices: Mutex<Vec<Notice>>,
    clicks: Mutex<Vec<String>>,
    readable: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl DeviceInner {
    /// Bring `screen` of `target` to the foreground and notify listeners.
    fn show(self: &Arc<Self>, target: &Target, screen: &str) -> Result<(), AutomationError> {
        let root = self
            .scenario
            .apps
            .get(target.as_str())
            .and_then(|app| app.screens.get(screen))
            .ok_or_else(|| AutomationError::LaunchFailed {
                target: target.to_string(),
                reason: format!("no screen named '{screen}'"),
            })?;

        let tree = Arc::new(MemoryTree::new(root));
        {
            let mut fg = lock(&self.foreground);
            fg.app = Some(target.clone());
            fg.screen = Some(screen.to_string());
            fg.tree = Some(tree.clone());
        }
        debug!("{target}: showing '{screen}'");

        let snapshot = self.readable.load(Ordering::SeqCst).then(|| {
            Arc::new(SimulatedScreen {
                tree,
                device: self.clone(),
            }) as Arc<dyn TreeSnapshot>
        });
        if self
            .screens
            .send(ScreenEvent::new(self.scenario.surface.clone(), snapshot))
            .is_err()
        {
            warn!("Nobody is listening for screen changes");
        }
        Ok(())
    }

    fn record_click(self: &Arc<Self>, tree: &MemoryTree, node: NodeId) {
        let label = tree
            .display_label(node)
            .or_else(|| tree.view_id(node))
            .unwrap_or_default()
            .to_string();
        info!("Click on '{label}'");
        lock(&self.clicks).push(label);

        let Some(next) = tree.opens(node) else {
            return;
        };
        let app = lock(&self.foreground).app.clone();
        if let Some(app) = app {
            if let Err(err) = self.show(&app, next) {
                warn!("Navigation to '{next}' failed: {err}");
            }
        }
    }
}

/// Snapshot of one simulated screen. Clicks go through to the device so navigation happens.
struct SimulatedScreen {
    tree: Arc<MemoryTree>,
    device: Arc<DeviceInner>,
}

impl TreeSnapshot for SimulatedScreen {
    fn find_by_text(&self, text: &str, root: Option<NodeId>) -> Vec<NodeId> {
        self.tree.find_by_text(text, root)
    }

    fn find_by_id(&self, id: &str, root: Option<NodeId>) -> Vec<NodeId> {
        self.tree.find_by_id(id, root)
    }

    fn is_clickable(&self, node: NodeId) -> bool {
        self.tree.is_clickable(node)
    }

    fn parent_of(&self, node: NodeId) -> Option<NodeId> {
        self.tree.parent_of(node)
    }

    fn click(&self, node: NodeId) -> bool {
        if !self.tree.click(node) {
            return false;
        }
        self.device.record_click(&self.tree, node);
        true
    }
}

/// In-process host backed by a [`Scenario`]
#[derive(Clone)]
pub struct SimulatedDevice {
    inner: Arc<DeviceInner>,
}

impl SimulatedDevice {
    /// Screen changes are delivered on `screens`.
    pub fn new(scenario: Scenario, screens: ScreenSender) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                scenario,
                screens,
                foreground: Mutex::new(Foreground::default()),
                notices: Mutex::new(Vec::new()),
                clicks: Mutex::new(Vec::new()),
                readable: AtomicBool::new(true),
            }),
        }
    }

    pub fn scenario(&self) -> &Scenario {
        &self.inner.scenario
    }

    /// When false the device behaves like a host that cannot read the active window.
    pub fn set_readable(&self, readable: bool) {
        self.inner.readable.store(readable, Ordering::SeqCst);
    }

    /// Report a screen change from some other surface, e.g. the launcher.
    pub fn emit_foreign_screen(&self, surface: impl Into<String>) {
        if self
            .inner
            .screens
            .send(ScreenEvent::new(surface, self.active_snapshot()))
            .is_err()
        {
            warn!("Nobody is listening for screen changes");
        }
    }

    pub fn current_screen(&self) -> Option<String> {
        lock(&self.inner.foreground).screen.clone()
    }

    /// Labels of every node clicked so far, across all screens
    pub fn clicks(&self) -> Vec<String> {
        lock(&self.inner.clicks).clone()
    }

    pub fn notices(&self) -> Vec<Notice> {
        lock(&self.inner.notices).clone()
    }
}

impl AccessibilityEngine for SimulatedDevice {
    fn active_snapshot(&self) -> Option<Arc<dyn TreeSnapshot>> {
        if !self.inner.readable.load(Ordering::SeqCst) {
            return None;
        }
        let tree = lock(&self.inner.foreground).tree.clone()?;
        Some(Arc::new(SimulatedScreen {
            tree,
            device: self.inner.clone(),
        }))
    }

    fn show_notice(&self, notice: &Notice) {
        info!("Notice ({:?}): {}", notice.duration, notice.text);
        lock(&self.inner.notices).push(notice.clone());
    }
}

#[async_trait::async_trait]
impl TargetLauncher for SimulatedDevice {
    async fn open_target(&self, target: &Target) -> Result<(), AutomationError> {
        let app = self
            .inner
            .scenario
            .apps
            .get(target.as_str())
            .ok_or_else(|| AutomationError::LaunchFailed {
                target: target.to_string(),
                reason: "package not installed".to_string(),
            })?;
        self.inner.show(target, &app.entry)
    }
}
