//! Decisions about what to click on a Settings screen
//!
//! Everything here is a pure function of a [`TreeSnapshot`] apart from the clicks
//! themselves, which are delegated to the snapshot.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::config::LabelSet;
use crate::tree::{NodeId, TreeSnapshot};

/// Accessibility trees are shallow; this only stops a malformed parent cycle.
const MAX_ANCESTOR_DEPTH: usize = 100;

/// A successful label search: which label hit, on which node, and what got clicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelMatch {
    pub label: String,
    pub matched: NodeId,
    pub clicked: NodeId,
}

/// The node itself when clickable, otherwise its nearest clickable ancestor.
pub fn clickable_ancestor(snapshot: &dyn TreeSnapshot, node: NodeId) -> Option<NodeId> {
    let mut current = node;
    for _ in 0..MAX_ANCESTOR_DEPTH {
        if snapshot.is_clickable(current) {
            return Some(current);
        }
        current = snapshot.parent_of(current)?;
    }
    warn!("clickable_ancestor: hit depth limit starting from {node}");
    None
}

/// Walk to the top-level container holding `node`.
pub fn top_level_container(snapshot: &dyn TreeSnapshot, node: NodeId) -> NodeId {
    let mut current = node;
    for _ in 0..MAX_ANCESTOR_DEPTH {
        match snapshot.parent_of(current) {
            Some(parent) => current = parent,
            None => return current,
        }
    }
    warn!("top_level_container: hit depth limit starting from {node}");
    current
}

/// Try each label in order and click the first match that resolves to a clickable node.
///
/// A match with no clickable ancestor, or whose click the host rejects, does not count;
/// the search moves on to the next node and then the next label.
pub fn click_by_labels(snapshot: &dyn TreeSnapshot, labels: &[String]) -> Option<LabelMatch> {
    for label in labels.iter().filter(|l| !l.trim().is_empty()) {
        for node in snapshot.find_by_text(label, None) {
            let Some(target) = clickable_ancestor(snapshot, node) else {
                debug!("'{label}' matched {node} but nothing above it is clickable");
                continue;
            };
            if snapshot.click(target) {
                debug!("Clicked {target} for label '{label}' (matched {node})");
                return Some(LabelMatch {
                    label: label.clone(),
                    matched: node,
                    clicked: target,
                });
            }
            debug!("Host rejected click on {target} for label '{label}'");
        }
    }
    None
}

/// Which of the sensitive keywords a dialog's text mentions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DialogMentions {
    pub cache: bool,
    pub data: bool,
    pub storage: bool,
}

/// How a dialog is treated by the confirmation check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogKind {
    /// Mentions cache and nothing else sensitive
    CacheOnly,
    /// Mentions none of the keywords
    Generic,
    /// Mentions data or storage; never confirmed
    Ambiguous,
}

impl DialogKind {
    pub fn is_safe(self) -> bool {
        !matches!(self, DialogKind::Ambiguous)
    }
}

impl DialogMentions {
    pub fn kind(&self) -> DialogKind {
        match (self.cache, self.data, self.storage) {
            (true, false, false) => DialogKind::CacheOnly,
            (false, false, false) => DialogKind::Generic,
            _ => DialogKind::Ambiguous,
        }
    }
}

/// Scan the subtree under `root` for the keywords.
pub fn classify_dialog(snapshot: &dyn TreeSnapshot, root: NodeId) -> DialogMentions {
    let mentions = |word: &str| !snapshot.find_by_text(word, Some(root)).is_empty();
    DialogMentions {
        cache: mentions("cache"),
        data: mentions("data"),
        storage: mentions("storage"),
    }
}

/// Result of [`confirm_if_safe`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConfirmOutcome {
    /// A positive button was clicked
    Confirmed { button: NodeId, kind: DialogKind },
    /// Candidates existed but none sat in a dialog that was safe to confirm
    Abstained { candidates: usize },
    /// No positive button anywhere on screen
    NoCandidates,
}

/// Positive-action candidates: known button ids first, then affirmative labels.
/// Deduplicated by node identity, discovery order kept.
pub fn positive_candidates(snapshot: &dyn TreeSnapshot, labels: &LabelSet) -> Vec<NodeId> {
    let by_id = labels
        .positive_button_ids
        .iter()
        .flat_map(|id| snapshot.find_by_id(id, None));
    let by_text = labels
        .confirm
        .iter()
        .filter(|l| !l.trim().is_empty())
        .flat_map(|label| snapshot.find_by_text(label, None));

    let mut seen = HashSet::new();
    by_id.chain(by_text).filter(|n| seen.insert(*n)).collect()
}

/// Click the first positive button whose dialog is unambiguously about cache, or carries
/// no sensitive keyword at all. Dialogs mentioning data or storage are left alone.
pub fn confirm_if_safe(snapshot: &dyn TreeSnapshot, labels: &LabelSet) -> ConfirmOutcome {
    let candidates = positive_candidates(snapshot, labels);
    if candidates.is_empty() {
        return ConfirmOutcome::NoCandidates;
    }

    let mut verdicts: HashMap<NodeId, DialogKind> = HashMap::new();
    for &button in &candidates {
        let root = top_level_container(snapshot, button);
        let kind = *verdicts
            .entry(root)
            .or_insert_with(|| classify_dialog(snapshot, root).kind());

        if !kind.is_safe() {
            debug!("Skipping {button}: dialog {root} mentions data or storage");
            continue;
        }
        if snapshot.is_clickable(button) && snapshot.click(button) {
            debug!("Confirmed {kind:?} dialog via {button}");
            return ConfirmOutcome::Confirmed { button, kind };
        }
    }

    ConfirmOutcome::Abstained {
        candidates: candidates.len(),
    }
}
