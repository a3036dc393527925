use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use crate::error::Result;
use crate::events::{WorkflowEvent, WorkflowObserver};
use crate::logger::LogEntry;
use crate::node::{Node, NodeStatus};

/// Aggregate counts returned by `TreeDebugger::get_stats`.
pub struct TreeStats {
    pub total_nodes: usize,
    pub by_status: HashMap<NodeStatus, usize>,
}

/// A `WorkflowObserver` that incrementally maintains an `id -> Node` index
/// and the current root reference, so it never rebuilds the tree from
/// scratch on every event — only on `childAttached`/`childDetached` does it
/// touch the affected subtree, and `treeUpdated`/`treeChanged` only swap
/// the root pointer.
pub struct TreeDebugger {
    nodes: RwLock<HashMap<String, Node>>,
    root: RwLock<Option<Node>>,
}

impl Default for TreeDebugger {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeDebugger {
    pub fn new() -> Self {
        Self { nodes: RwLock::new(HashMap::new()), root: RwLock::new(None) }
    }

    fn index_subtree(&self, node: &Node) {
        let mut nodes = self.nodes.write().unwrap();
        let mut stack = vec![node.clone()];
        while let Some(n) = stack.pop() {
            stack.extend(n.children());
            nodes.insert(n.id(), n);
        }
    }

    fn remove_subtree(&self, node_id: &str) {
        let mut nodes = self.nodes.write().unwrap();
        let Some(start) = nodes.get(node_id).cloned() else {
            return;
        };
        let mut queue = VecDeque::new();
        queue.push_back(start);
        while let Some(n) = queue.pop_front() {
            if nodes.remove(&n.id()).is_some() {
                queue.extend(n.children());
            }
        }
    }

    /// Reconciles the root reference without rebuilding the index: inserts
    /// only the root node itself (O(1)) if it isn't already known — every
    /// other node reaches the map via `childAttached`/`childDetached` — then
    /// swaps the root pointer.
    fn set_root(&self, node: &Node) {
        self.nodes.write().unwrap().entry(node.id()).or_insert_with(|| node.clone());
        *self.root.write().unwrap() = Some(node.clone());
    }

    /// Renders the indexed tree as a depth-first preorder ASCII tree, one
    /// node per line, each ending in its status glyph.
    pub fn to_tree_string(&self) -> String {
        match self.root.read().unwrap().clone() {
            Some(root) => {
                let mut out = String::new();
                render(&root, "", true, &mut out);
                out
            }
            None => String::new(),
        }
    }

    pub fn get_stats(&self) -> TreeStats {
        let nodes = self.nodes.read().unwrap();
        let mut by_status = HashMap::new();
        for n in nodes.values() {
            *by_status.entry(n.status()).or_insert(0) += 1;
        }
        TreeStats { total_nodes: nodes.len(), by_status }
    }

    pub fn get_tree(&self) -> (Option<Node>, Vec<LogEntry>) {
        let root = self.root.read().unwrap().clone();
        let nodes = self.nodes.read().unwrap();
        let logs = nodes.values().flat_map(|n| n.logs()).collect();
        (root, logs)
    }
}

impl WorkflowObserver for TreeDebugger {
    fn on_log(&self, _entry: &LogEntry) {}

    fn on_event(&self, event: &WorkflowEvent) -> Result<()> {
        match event {
            WorkflowEvent::ChildAttached { child, .. } => self.index_subtree(child),
            WorkflowEvent::ChildDetached { child_id, .. } => self.remove_subtree(child_id),
            WorkflowEvent::TreeUpdated { root } => {
                if let Some(r) = root.upgrade() {
                    self.set_root(&r);
                } else {
                    tracing::warn!("treeUpdated event carried a node that no longer exists");
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn on_state_updated(&self, _node: &Node) -> Result<()> {
        Ok(())
    }

    fn on_tree_changed(&self, root: &Node) -> Result<()> {
        self.set_root(root);
        Ok(())
    }
}

fn render(node: &Node, prefix: &str, is_root: bool, out: &mut String) {
    render_with_connector(node, prefix, is_root, true, out)
}

fn render_with_connector(node: &Node, prefix: &str, is_root: bool, is_last: bool, out: &mut String) {
    let connector = if is_root { "" } else if is_last { "└─ " } else { "├─ " };
    let duration = node.last_step_duration_ms().map(|d| format!(" ({d}ms)")).unwrap_or_default();
    out.push_str(&format!("{prefix}{connector}{}{duration} {}\n", node.name(), node.status().glyph()));

    let child_prefix = if is_root {
        prefix.to_string()
    } else if is_last {
        format!("{prefix}   ")
    } else {
        format!("{prefix}│  ")
    };

    let children = node.children();
    let count = children.len();
    for (i, c) in children.iter().enumerate() {
        render_with_connector(c, &child_prefix, false, i + 1 == count, out);
    }
}
