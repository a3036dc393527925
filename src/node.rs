use std::sync::{Arc, RwLock, Weak};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::events::WorkflowEvent;
use crate::logger::LogEntry;

/// Ceiling on a workflow/node name, matching `GroundswellConfig::max_name_length`'s default.
pub const DEFAULT_MAX_NAME_LEN: usize = 100;

/// The lifecycle of a `Node`, mirrored 1:1 from its owning `Workflow`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::AsRefStr, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl NodeStatus {
    /// The glyph `TreeDebugger` prints after a node's name.
    pub fn glyph(self) -> char {
        match self {
            NodeStatus::Idle => '○',
            NodeStatus::Running => '◐',
            NodeStatus::Completed => '✓',
            NodeStatus::Failed => '✗',
            NodeStatus::Cancelled => '⊘',
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Cancelled)
    }
}

pub(crate) fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::NameInvalid("name must not be empty or whitespace-only".into()));
    }
    if trimmed.chars().count() > DEFAULT_MAX_NAME_LEN {
        return Err(Error::NameInvalid(format!(
            "name exceeds {DEFAULT_MAX_NAME_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

struct NodeData {
    id: String,
    name: String,
    parent: Option<Weak<RwLock<NodeData>>>,
    children: Vec<Node>,
    status: NodeStatus,
    logs: Vec<LogEntry>,
    events: Vec<WorkflowEvent>,
    state_snapshot: Option<Map<String, Value>>,
}

/// The immutable-shape projection of a `Workflow`: read-only from the
/// outside, mutated only by the `Workflow` methods that mirror it.
#[derive(Clone)]
pub struct Node {
    inner: Arc<RwLock<NodeData>>,
}

/// A non-owning reference to a `Node`, used inside `WorkflowEvent` variants
/// whose payload is the node the event originated on — a strong `Node`
/// there would make a node's own event log hold a strong cycle back to
/// itself.
#[derive(Clone)]
pub struct NodeRef(Weak<RwLock<NodeData>>);

impl NodeRef {
    pub fn upgrade(&self) -> Option<Node> {
        self.0.upgrade().map(|inner| Node { inner })
    }
}

impl Node {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = validate_name(&name.into())?;
        Ok(Self {
            inner: Arc::new(RwLock::new(NodeData {
                id: crate::id::new_id(),
                name,
                parent: None,
                children: Vec::new(),
                status: NodeStatus::Idle,
                logs: Vec::new(),
                events: Vec::new(),
                state_snapshot: None,
            })),
        })
    }

    pub fn id(&self) -> String {
        self.inner.read().unwrap().id.clone()
    }

    pub fn name(&self) -> String {
        self.inner.read().unwrap().name.clone()
    }

    pub fn status(&self) -> NodeStatus {
        self.inner.read().unwrap().status
    }

    pub fn parent(&self) -> Option<Node> {
        self.inner.read().unwrap().parent.as_ref().and_then(|w| w.upgrade()).map(|inner| Node { inner })
    }

    pub fn children(&self) -> Vec<Node> {
        self.inner.read().unwrap().children.clone()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.inner.read().unwrap().logs.clone()
    }

    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.inner.read().unwrap().events.clone()
    }

    pub fn state_snapshot(&self) -> Option<Map<String, Value>> {
        self.inner.read().unwrap().state_snapshot.clone()
    }

    pub fn downgrade(&self) -> NodeRef {
        NodeRef(Arc::downgrade(&self.inner))
    }

    /// The duration of the most recently recorded `StepEnd` originating on
    /// this node, if any — used by `TreeDebugger`'s renderer.
    pub fn last_step_duration_ms(&self) -> Option<u64> {
        self.inner.read().unwrap().events.iter().rev().find_map(|e| match e {
            WorkflowEvent::StepEnd { duration_ms, .. } => Some(*duration_ms),
            _ => None,
        })
    }

    pub(crate) fn set_parent(&self, parent: Option<&Node>) {
        self.inner.write().unwrap().parent = parent.map(|p| Arc::downgrade(&p.inner));
    }

    pub(crate) fn push_child(&self, child: Node) {
        self.inner.write().unwrap().children.push(child);
    }

    pub(crate) fn remove_child(&self, child_id: &str) -> bool {
        let mut data = self.inner.write().unwrap();
        let before = data.children.len();
        data.children.retain(|c| c.id() != child_id);
        data.children.len() != before
    }

    pub(crate) fn set_status(&self, status: NodeStatus) {
        self.inner.write().unwrap().status = status;
    }

    pub(crate) fn append_log(&self, entry: LogEntry) {
        self.inner.write().unwrap().logs.push(entry);
    }

    pub(crate) fn append_event(&self, event: WorkflowEvent) {
        self.inner.write().unwrap().events.push(event);
    }

    pub(crate) fn set_state_snapshot(&self, snapshot: Map<String, Value>) {
        self.inner.write().unwrap().state_snapshot = Some(snapshot);
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Node {}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.inner.read().unwrap();
        f.debug_struct("Node")
            .field("id", &data.id)
            .field("name", &data.name)
            .field("status", &data.status)
            .field("children", &data.children.len())
            .finish()
    }
}
