use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::new_id;
use crate::node::Node;
use crate::utils::time::time_millis;
use crate::workflow::Workflow;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A single hierarchical log entry. This is data — appended to the owning
/// node and fanned out to observers, not a side channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub workflow_id: String,
    pub timestamp: i64,
    pub level: LogLevel,
    pub message: String,
    pub data: Option<Value>,
    pub parent_log_id: Option<String>,
}

/// Optional overrides applied by `Logger::child_with`.
#[derive(Default, Clone)]
pub struct LogEntryMeta {
    pub parent_log_id: Option<String>,
}

/// Owned by the `Workflow` that constructs it. Emits entries tagged with
/// that workflow's id, appends them to its node, and fans them out to the
/// tree's root observers.
#[derive(Clone)]
pub struct Logger {
    workflow_id: String,
    node: Node,
    workflow_ref: crate::workflow::WorkflowRef,
    parent_log_id: Option<String>,
}

impl Logger {
    pub(crate) fn new(workflow_id: String, node: Node, workflow_ref: crate::workflow::WorkflowRef) -> Self {
        Self { workflow_id, node, workflow_ref, parent_log_id: None }
    }

    fn emit(&self, level: LogLevel, message: String, data: Option<Value>) {
        let entry = LogEntry {
            id: new_id(),
            workflow_id: self.workflow_id.clone(),
            timestamp: time_millis(),
            level,
            message,
            data,
            parent_log_id: self.parent_log_id.clone(),
        };
        self.node.append_log(entry.clone());
        if let Some(wf) = Workflow::from_ref(&self.workflow_ref) {
            wf.dispatch_log(&entry);
        }
    }

    pub fn debug(&self, message: impl Into<String>, data: Option<Value>) {
        self.emit(LogLevel::Debug, message.into(), data);
    }

    pub fn info(&self, message: impl Into<String>, data: Option<Value>) {
        self.emit(LogLevel::Info, message.into(), data);
    }

    pub fn warn(&self, message: impl Into<String>, data: Option<Value>) {
        self.emit(LogLevel::Warn, message.into(), data);
    }

    pub fn error(&self, message: impl Into<String>, data: Option<Value>) {
        self.emit(LogLevel::Error, message.into(), data);
    }

    /// A derived logger that stamps `parent_log_id` on every entry it emits.
    pub fn child(&self, parent_log_id: impl Into<String>) -> Logger {
        let mut c = self.clone();
        c.parent_log_id = Some(parent_log_id.into());
        c
    }

    /// A derived logger, overriding `parent_log_id` from a meta struct
    /// rather than a bare id.
    pub fn child_with(&self, meta: LogEntryMeta) -> Logger {
        let mut c = self.clone();
        c.parent_log_id = meta.parent_log_id;
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{WorkflowEvent, WorkflowObserver};
    use crate::error::Result as GsResult;
    use std::sync::{Arc, Mutex};

    struct Collector {
        logs: Arc<Mutex<Vec<LogEntry>>>,
    }

    impl WorkflowObserver for Collector {
        fn on_log(&self, entry: &LogEntry) {
            self.logs.lock().unwrap().push(entry.clone());
        }
        fn on_event(&self, _event: &WorkflowEvent) -> GsResult<()> {
            Ok(())
        }
        fn on_state_updated(&self, _node: &Node) -> GsResult<()> {
            Ok(())
        }
        fn on_tree_changed(&self, _root: &Node) -> GsResult<()> {
            Ok(())
        }
    }

    #[test]
    fn child_logger_stamps_parent_log_id_and_propagates_to_root_observers() {
        let root = Workflow::new(Some("root"), None).unwrap();
        let logs = Arc::new(Mutex::new(Vec::new()));
        root.add_observer(Arc::new(Collector { logs: logs.clone() })).unwrap();

        let child_wf = Workflow::new(Some("child"), Some(&root)).unwrap();
        let root_logger = root.logger();
        root_logger.info("starting", None);

        let first_id = logs.lock().unwrap().last().unwrap().id.clone();
        let derived = child_wf.logger().child(first_id.clone());
        derived.warn("a nested note", None);

        let collected = logs.lock().unwrap();
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[1].parent_log_id.as_deref(), Some(first_id.as_str()));
        assert_eq!(collected[1].workflow_id, child_wf.id());
    }
}
