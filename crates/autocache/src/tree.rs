//! Accessibility tree snapshots and the queries the heuristics run against them

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::sync::Mutex;

use crate::utils::contains_ignore_case;

/// Opaque handle to a node inside one snapshot.
///
/// Handles are only meaningful for the snapshot that produced them and compare equal
/// when they refer to the same node, which is what deduplication relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Point-in-time view of a remote UI tree, as handed out by the host framework.
///
/// Implementations must follow the host's text matching rule: a text query matches any
/// node whose text or content description contains the query, ignoring case.
pub trait TreeSnapshot: Send + Sync {
    /// Nodes whose text contains `text`. When `root` is given only that node and its
    /// descendants are searched.
    fn find_by_text(&self, text: &str, root: Option<NodeId>) -> Vec<NodeId>;

    /// Nodes whose stable view identifier equals `id`.
    fn find_by_id(&self, id: &str, root: Option<NodeId>) -> Vec<NodeId>;

    fn is_clickable(&self, node: NodeId) -> bool;

    fn parent_of(&self, node: NodeId) -> Option<NodeId>;

    /// Perform a click on the node. Returns false when the host rejected the action.
    fn click(&self, node: NodeId) -> bool;
}

/// Declarative description of a UI tree, used for scenario files and tests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiNode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_id: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub clickable: bool,
    /// Name of the screen shown after this node is clicked (simulated hosts only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opens: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<UiNode>,
}

impl UiNode {
    /// A non-clickable text leaf
    pub fn label(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// A clickable node carrying its own text
    pub fn button(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            clickable: true,
            ..Default::default()
        }
    }

    /// A text-less grouping node
    pub fn container(children: Vec<UiNode>) -> Self {
        Self {
            children,
            ..Default::default()
        }
    }

    pub fn with_view_id(mut self, id: impl Into<String>) -> Self {
        self.view_id = Some(id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_clickable(mut self, clickable: bool) -> Self {
        self.clickable = clickable;
        self
    }

    pub fn with_opens(mut self, screen: impl Into<String>) -> Self {
        self.opens = Some(screen.into());
        self
    }

    pub fn with_children(mut self, children: Vec<UiNode>) -> Self {
        self.children = children;
        self
    }
}

#[derive(Debug)]
struct FlatNode {
    text: Option<String>,
    description: Option<String>,
    view_id: Option<String>,
    clickable: bool,
    opens: Option<String>,
    parent: Option<usize>,
    /// One past the last descendant in pre-order
    end: usize,
}

impl FlatNode {
    fn matches_text(&self, query: &str) -> bool {
        self.text
            .as_deref()
            .is_some_and(|t| contains_ignore_case(t, query))
            || self
                .description
                .as_deref()
                .is_some_and(|d| contains_ignore_case(d, query))
    }
}

/// In-memory snapshot built from a [`UiNode`] description.
///
/// Nodes are stored in pre-order so every subtree is a contiguous range. Clicks are
/// recorded rather than dispatched anywhere.
#[derive(Debug)]
pub struct MemoryTree {
    nodes: Vec<FlatNode>,
    clicks: Mutex<Vec<NodeId>>,
}

impl MemoryTree {
    pub fn new(root: &UiNode) -> Self {
        let mut nodes = Vec::new();
        Self::flatten(&mut nodes, root, None);
        Self {
            nodes,
            clicks: Mutex::new(Vec::new()),
        }
    }

    fn flatten(nodes: &mut Vec<FlatNode>, node: &UiNode, parent: Option<usize>) {
        let index = nodes.len();
        nodes.push(FlatNode {
            text: node.text.clone(),
            description: node.description.clone(),
            view_id: node.view_id.clone(),
            clickable: node.clickable,
            opens: node.opens.clone(),
            parent,
            end: index + 1,
        });
        for child in &node.children {
            Self::flatten(nodes, child, Some(index));
        }
        nodes[index].end = nodes.len();
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn get(&self, node: NodeId) -> Option<&FlatNode> {
        usize::try_from(node.0).ok().and_then(|i| self.nodes.get(i))
    }

    fn scope(&self, root: Option<NodeId>) -> Range<usize> {
        match root {
            None => 0..self.nodes.len(),
            Some(id) => match usize::try_from(id.0).ok().zip(self.get(id)) {
                Some((start, node)) => start..node.end,
                None => 0..0,
            },
        }
    }

    /// Text (or, failing that, content description) of a node
    pub fn label(&self, node: NodeId) -> Option<&str> {
        self.get(node)
            .and_then(|n| n.text.as_deref().or(n.description.as_deref()))
    }

    /// Label of the node, or of its first labelled descendant for text-less containers
    pub fn display_label(&self, node: NodeId) -> Option<&str> {
        self.scope(Some(node)).find_map(|i| {
            let n = &self.nodes[i];
            n.text.as_deref().or(n.description.as_deref())
        })
    }

    pub fn view_id(&self, node: NodeId) -> Option<&str> {
        self.get(node).and_then(|n| n.view_id.as_deref())
    }

    /// Screen a simulated host should switch to after this node is clicked
    pub fn opens(&self, node: NodeId) -> Option<&str> {
        self.get(node).and_then(|n| n.opens.as_deref())
    }

    /// Every node clicked so far, in order
    pub fn clicks(&self) -> Vec<NodeId> {
        match self.clicks.lock() {
            Ok(clicks) => clicks.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Labels of the clicked nodes, falling back to the view id for text-less nodes
    pub fn clicked_labels(&self) -> Vec<String> {
        self.clicks()
            .into_iter()
            .map(|id| {
                self.display_label(id)
                    .or_else(|| self.view_id(id))
                    .unwrap_or_default()
                    .to_string()
            })
            .collect()
    }
}

impl TreeSnapshot for MemoryTree {
    fn find_by_text(&self, text: &str, root: Option<NodeId>) -> Vec<NodeId> {
        self.scope(root)
            .filter(|&i| self.nodes[i].matches_text(text))
            .map(|i| NodeId(i as u64))
            .collect()
    }

    fn find_by_id(&self, id: &str, root: Option<NodeId>) -> Vec<NodeId> {
        self.scope(root)
            .filter(|&i| self.nodes[i].view_id.as_deref() == Some(id))
            .map(|i| NodeId(i as u64))
            .collect()
    }

    fn is_clickable(&self, node: NodeId) -> bool {
        self.get(node).is_some_and(|n| n.clickable)
    }

    fn parent_of(&self, node: NodeId) -> Option<NodeId> {
        self.get(node)
            .and_then(|n| n.parent)
            .map(|p| NodeId(p as u64))
    }

    fn click(&self, node: NodeId) -> bool {
        if !self.is_clickable(node) {
            return false;
        }
        if let Ok(mut clicks) = self.clicks.lock() {
            clicks.push(node);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_info() -> UiNode {
        UiNode::container(vec![
            UiNode::label("App info"),
            UiNode::container(vec![
                UiNode::label("Storage & cache"),
                UiNode::label("12 MB used in internal storage"),
            ])
            .with_clickable(true),
            UiNode::button("Force stop").with_view_id("com.android.settings:id/button2"),
        ])
    }

    #[test]
    fn test_find_by_text_is_case_insensitive_containment() {
        let tree = MemoryTree::new(&app_info());
        let hits = tree.find_by_text("storage", None);
        assert_eq!(hits, vec![NodeId(3), NodeId(4)]);
        assert!(tree.find_by_text("Uninstall", None).is_empty());
    }

    #[test]
    fn test_find_by_text_respects_root_scope() {
        let tree = MemoryTree::new(&app_info());
        let section = NodeId(2);
        assert_eq!(tree.find_by_text("cache", Some(section)), vec![NodeId(3)]);
        assert!(tree.find_by_text("App info", Some(section)).is_empty());
    }

    #[test]
    fn test_parent_chain_and_clicks() {
        let tree = MemoryTree::new(&app_info());
        let label = NodeId(3);
        assert!(!tree.is_clickable(label));
        assert_eq!(tree.parent_of(label), Some(NodeId(2)));
        assert_eq!(tree.parent_of(tree.root()), None);

        assert!(!tree.click(label));
        assert!(tree.click(NodeId(2)));
        assert_eq!(tree.clicks(), vec![NodeId(2)]);
        assert_eq!(tree.clicked_labels(), vec!["Storage & cache".to_string()]);
    }

    #[test]
    fn test_find_by_id_and_label_fallback() {
        let tree = MemoryTree::new(&app_info());
        let hits = tree.find_by_id("com.android.settings:id/button2", None);
        assert_eq!(hits.len(), 1);
        assert!(tree.click(hits[0]));
        assert_eq!(tree.clicked_labels(), vec!["Force stop".to_string()]);
    }

    #[test]
    fn test_ui_node_yaml_shape() {
        let yaml = r#"
children:
  - text: Clear cache
    clickable: true
    opens: confirm
"#;
        let node: UiNode = serde_yaml::from_str(yaml).expect("valid tree");
        assert_eq!(node.children.len(), 1);
        assert!(node.children[0].clickable);
        assert_eq!(node.children[0].opens.as_deref(), Some("confirm"));
    }
}
