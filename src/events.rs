use serde_json::Value;

use crate::error::{Result, WorkflowError};
use crate::logger::LogEntry;
use crate::node::{Node, NodeRef};
use crate::reflection::ReflectionLevel;

/// Everything that happens inside a workflow tree, fanned out to observers
/// and appended to the originating node's own event log.
#[derive(Clone)]
pub enum WorkflowEvent {
    StepStart { node: NodeRef, step: String },
    StepEnd { node: NodeRef, step: String, duration_ms: u64 },
    TaskStart { node: NodeRef, task: String },
    TaskEnd { node: NodeRef, task: String },
    ChildAttached { parent_id: String, child: Node },
    ChildDetached { parent_id: String, child_id: String },
    StateSnapshot { node: NodeRef },
    TreeUpdated { root: NodeRef },
    Error { node: NodeRef, error: WorkflowError },
    AgentPromptStart { agent_id: String, agent_name: String, prompt_id: String },
    AgentPromptEnd {
        agent_id: String,
        agent_name: String,
        prompt_id: String,
        duration_ms: u64,
        token_usage: Option<Value>,
    },
    ToolInvocation { tool_name: String, input: Value, output: Value, duration_ms: u64 },
    ReflectionStart { level: ReflectionLevel, attempt: u32 },
    ReflectionEnd { level: ReflectionLevel, attempt: u32, should_retry: bool },
    CacheHit { key: String },
    CacheMiss { key: String },
}

impl WorkflowEvent {
    /// The node this event is about, if any. For self-referential variants
    /// this upgrades the weak ref and may return `None` if the node has
    /// since been dropped.
    pub fn node(&self) -> Option<Node> {
        match self {
            WorkflowEvent::StepStart { node, .. }
            | WorkflowEvent::StepEnd { node, .. }
            | WorkflowEvent::TaskStart { node, .. }
            | WorkflowEvent::TaskEnd { node, .. }
            | WorkflowEvent::StateSnapshot { node }
            | WorkflowEvent::Error { node, .. } => node.upgrade(),
            WorkflowEvent::ChildAttached { child, .. } => Some(child.clone()),
            WorkflowEvent::TreeUpdated { root } => root.upgrade(),
            _ => None,
        }
    }

    /// The spec's camelCase event tag, used in logs and tests.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowEvent::StepStart { .. } => "stepStart",
            WorkflowEvent::StepEnd { .. } => "stepEnd",
            WorkflowEvent::TaskStart { .. } => "taskStart",
            WorkflowEvent::TaskEnd { .. } => "taskEnd",
            WorkflowEvent::ChildAttached { .. } => "childAttached",
            WorkflowEvent::ChildDetached { .. } => "childDetached",
            WorkflowEvent::StateSnapshot { .. } => "stateSnapshot",
            WorkflowEvent::TreeUpdated { .. } => "treeUpdated",
            WorkflowEvent::Error { .. } => "error",
            WorkflowEvent::AgentPromptStart { .. } => "agentPromptStart",
            WorkflowEvent::AgentPromptEnd { .. } => "agentPromptEnd",
            WorkflowEvent::ToolInvocation { .. } => "toolInvocation",
            WorkflowEvent::ReflectionStart { .. } => "reflectionStart",
            WorkflowEvent::ReflectionEnd { .. } => "reflectionEnd",
            WorkflowEvent::CacheHit { .. } => "cacheHit",
            WorkflowEvent::CacheMiss { .. } => "cacheMiss",
        }
    }

    /// Whether this event should additionally be delivered via
    /// `WorkflowObserver::on_tree_changed`.
    pub fn triggers_tree_changed(&self) -> bool {
        matches!(
            self,
            WorkflowEvent::ChildAttached { .. } | WorkflowEvent::ChildDetached { .. } | WorkflowEvent::TreeUpdated { .. }
        )
    }
}

impl std::fmt::Debug for WorkflowEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WorkflowEvent::{}", self.kind())
    }
}

/// Registered only at a tree's root (§6); receives every event, log entry,
/// state snapshot, and tree-shape change for the whole tree.
pub trait WorkflowObserver: Send + Sync {
    /// Must not throw; a logger is expected to always be able to emit.
    fn on_log(&self, entry: &LogEntry);
    fn on_event(&self, event: &WorkflowEvent) -> Result<()>;
    fn on_state_updated(&self, node: &Node) -> Result<()>;
    fn on_tree_changed(&self, root: &Node) -> Result<()>;
}
