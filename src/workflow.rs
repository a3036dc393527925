use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::events::{WorkflowEvent, WorkflowObserver};
use crate::logger::Logger;
use crate::node::{validate_name, Node, NodeStatus};
use crate::state::{capture_fields, ObservedField, ObservedStateBag};

/// A `Workflow`'s ambient status reuses `NodeStatus`: the two trees mirror
/// the same five-value lifecycle by construction.
pub type WorkflowStatus = NodeStatus;

const DEFAULT_NAME: &str = "Workflow";

/// A subclass-style unit of work. `run` receives the live `Workflow` it was
/// constructed against (so it can attach children, log, emit events).
#[async_trait]
pub trait WorkflowRun: Send + Sync {
    async fn run(&self, workflow: &Workflow) -> Result<Value>;

    /// A stable type identifier used as the default name when none is
    /// given, in place of runtime class-name reflection.
    fn type_name(&self) -> &'static str {
        DEFAULT_NAME
    }

    /// Fields this run contributes to `Workflow::captured_state`, in place
    /// of field-decorator reflection.
    fn observed_fields(&self) -> Vec<ObservedField> {
        Vec::new()
    }
}

/// A functional-mode unit of work: an executor closure driven by a
/// `WorkflowContext` instead of a `WorkflowRun` subclass.
pub type Executor =
    Arc<dyn Fn(crate::workflow_context::WorkflowContext) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

enum RunKind {
    Subclass(Arc<dyn WorkflowRun>),
    Functional(Executor),
    None,
}

pub(crate) struct WorkflowInner {
    id: String,
    node: Node,
    parent: RwLock<Option<Weak<WorkflowInner>>>,
    children: RwLock<Vec<Workflow>>,
    status: RwLock<WorkflowStatus>,
    observers: RwLock<Vec<Arc<dyn WorkflowObserver>>>,
    state: ObservedStateBag,
    run_kind: RunKind,
}

/// A non-owning reference to a `Workflow`, held by its own `Logger` so
/// logging never creates an `Arc` cycle back through the tree.
pub(crate) type WorkflowRef = Weak<WorkflowInner>;

/// A live node in the workflow tree: owns a mirrored `Node` projection,
/// a parent/children topology, ambient status, and (at the root only) the
/// registered observers for the whole tree.
#[derive(Clone)]
pub struct Workflow {
    inner: Arc<WorkflowInner>,
}

impl Workflow {
    fn build(name: Option<&str>, parent: Option<&Workflow>, run_kind: RunKind) -> Result<Workflow> {
        let resolved_name = name.map(|n| n.to_string()).unwrap_or_else(|| match &run_kind {
            RunKind::Subclass(r) => r.type_name().to_string(),
            _ => DEFAULT_NAME.to_string(),
        });
        let _ = validate_name(&resolved_name)?;
        let node = Node::new(resolved_name)?;
        let inner = Arc::new(WorkflowInner {
            id: node.id(),
            node,
            parent: RwLock::new(None),
            children: RwLock::new(Vec::new()),
            status: RwLock::new(WorkflowStatus::Idle),
            observers: RwLock::new(Vec::new()),
            state: ObservedStateBag::new(),
            run_kind,
        });
        let workflow = Workflow { inner };
        if let Some(p) = parent {
            p.attach_child(&workflow)?;
        }
        Ok(workflow)
    }

    /// A plain container workflow with no run behavior of its own (used for
    /// structural nodes such as step/revision children instrumented by
    /// `instrument_step`).
    pub fn new(name: Option<&str>, parent: Option<&Workflow>) -> Result<Workflow> {
        Self::build(name, parent, RunKind::None)
    }

    pub fn with_run(name: Option<&str>, parent: Option<&Workflow>, run: Arc<dyn WorkflowRun>) -> Result<Workflow> {
        Self::build(name, parent, RunKind::Subclass(run))
    }

    pub fn with_executor(name: Option<&str>, parent: Option<&Workflow>, executor: Executor) -> Result<Workflow> {
        Self::build(name, parent, RunKind::Functional(executor))
    }

    pub fn id(&self) -> String {
        self.inner.id.clone()
    }

    pub fn name(&self) -> String {
        self.inner.node.name()
    }

    pub fn node(&self) -> Node {
        self.inner.node.clone()
    }

    pub fn status(&self) -> WorkflowStatus {
        *self.inner.status.read().unwrap()
    }

    pub fn parent(&self) -> Option<Workflow> {
        self.inner.parent.read().unwrap().as_ref().and_then(|w| w.upgrade()).map(|inner| Workflow { inner })
    }

    pub fn children(&self) -> Vec<Workflow> {
        self.inner.children.read().unwrap().clone()
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.read().unwrap().is_none()
    }

    pub fn logger(&self) -> Logger {
        Logger::new(self.id(), self.node(), self.downgrade())
    }

    pub(crate) fn downgrade(&self) -> WorkflowRef {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_ref(r: &WorkflowRef) -> Option<Workflow> {
        r.upgrade().map(|inner| Workflow { inner })
    }

    /// Walks to the root via parent links, guarding against a corrupted
    /// tree with a visited set.
    pub(crate) fn root_checked(&self) -> Result<Workflow> {
        let mut current = self.clone();
        let mut visited = HashSet::new();
        loop {
            if !visited.insert(current.id()) {
                return Err(Error::CycleDetected(current.id()));
            }
            match current.parent() {
                Some(p) => current = p,
                None => return Ok(current),
            }
        }
    }

    /// Whether `self` currently sits somewhere under `ancestor`.
    fn is_descendant_of(&self, ancestor: &Workflow) -> Result<bool> {
        let mut current = self.parent();
        let mut visited = HashSet::new();
        while let Some(c) = current {
            if !visited.insert(c.id()) {
                return Err(Error::CycleDetected(c.id()));
            }
            if c.id() == ancestor.id() {
                return Ok(true);
            }
            current = c.parent();
        }
        Ok(false)
    }

    pub fn root_node(&self) -> Node {
        self.root_checked().map(|r| r.node()).unwrap_or_else(|_| self.node())
    }

    pub fn last_completed_child(&self) -> Option<Workflow> {
        self.inner
            .children
            .read()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.status() == WorkflowStatus::Completed)
            .cloned()
    }

    /// Attaches `child` under `self`. Rejects self-attach, a child that
    /// already has a parent, forming a cycle, or a child already present —
    /// all as `Error::TreeConstraintViolation`.
    pub fn attach_child(&self, child: &Workflow) -> Result<()> {
        if self.id() == child.id() {
            return Err(Error::TreeConstraintViolation(format!(
                "workflow '{}' cannot attach itself as a child",
                self.id()
            )));
        }
        if child.parent().is_some() {
            return Err(Error::TreeConstraintViolation(format!(
                "workflow '{}' already has a parent; detach it first",
                child.id()
            )));
        }
        if self.is_descendant_of(child)? {
            return Err(Error::TreeConstraintViolation(format!(
                "attaching '{}' under '{}' would create a cycle",
                child.id(),
                self.id()
            )));
        }
        {
            let children = self.inner.children.read().unwrap();
            if children.iter().any(|c| c.id() == child.id()) {
                return Err(Error::TreeConstraintViolation(format!(
                    "'{}' is already a child of '{}'",
                    child.id(),
                    self.id()
                )));
            }
        }

        self.inner.children.write().unwrap().push(child.clone());
        self.inner.node.push_child(child.node());
        *child.inner.parent.write().unwrap() = Some(self.downgrade());
        child.inner.node.set_parent(Some(&self.inner.node));

        self.emit_event(WorkflowEvent::ChildAttached { parent_id: self.id(), child: child.node() })
    }

    /// Detaches `child` from `self`. Fails with `Error::TreeConstraintViolation`
    /// if `child` is not currently a child of `self`.
    pub fn detach_child(&self, child: &Workflow) -> Result<()> {
        {
            let mut children = self.inner.children.write().unwrap();
            let before = children.len();
            children.retain(|c| c.id() != child.id());
            if children.len() == before {
                return Err(Error::TreeConstraintViolation(format!(
                    "'{}' is not a child of '{}'",
                    child.id(),
                    self.id()
                )));
            }
        }
        self.inner.node.remove_child(&child.id());
        *child.inner.parent.write().unwrap() = None;
        child.inner.node.set_parent(None);

        self.emit_event(WorkflowEvent::ChildDetached { parent_id: self.id(), child_id: child.id() })
    }

    /// Registers an observer. Only legal on a root workflow (no parent).
    /// Immediately delivers one `on_tree_changed` so observers that
    /// reconcile a root reference (e.g. `TreeDebugger`) without rebuilding
    /// their index see the tree's current root right away, rather than
    /// waiting for the first `childAttached`/`treeUpdated` event.
    pub fn add_observer(&self, observer: Arc<dyn WorkflowObserver>) -> Result<()> {
        if !self.is_root() {
            return Err(Error::TreeConstraintViolation(
                "observers may only be attached to a root workflow".into(),
            ));
        }
        self.inner.observers.write().unwrap().push(observer.clone());

        let node = self.node();
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| observer.on_tree_changed(&node)));
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.logger().error(format!("observer onTreeChanged failed: {e}"), None),
            Err(_) => self.logger().error("observer onTreeChanged panicked".to_string(), None),
        }

        Ok(())
    }

    fn validate_transition(from: WorkflowStatus, to: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        from == to || matches!((from, to), (Idle, Running) | (Running, Completed) | (Running, Failed) | (Running, Cancelled))
    }

    /// Updates ambient status (mirrored onto the node) and emits a
    /// `treeUpdated` event carrying the whole tree's current root node.
    pub fn set_status(&self, status: WorkflowStatus) -> Result<()> {
        let current = *self.inner.status.read().unwrap();
        if !Self::validate_transition(current, status) {
            return Err(Error::Other(format!("invalid status transition {current:?} -> {status:?}")));
        }
        *self.inner.status.write().unwrap() = status;
        self.inner.node.set_status(status);
        let root_ref = self.root_checked()?.node().downgrade();
        self.emit_event(WorkflowEvent::TreeUpdated { root: root_ref })
    }

    /// Fields this workflow contributes to its `WorkflowError.state`/
    /// `stateSnapshot`: its own `ObservedStateBag` plus, for subclass runs,
    /// whatever the `WorkflowRun` itself reports.
    pub fn captured_state(&self) -> Map<String, Value> {
        let mut fields = self.inner.state.observed_fields();
        if let RunKind::Subclass(run) = &self.inner.run_kind {
            fields.extend(run.observed_fields());
        }
        capture_fields(fields)
    }

    pub fn set_state_field(&self, name: impl Into<String>, value: impl Into<Value>, redact: bool, hidden: bool) {
        self.inner.state.set(name, value, redact, hidden);
    }

    /// Captures and stores a state snapshot on the node, notifies
    /// `on_state_updated`, then emits `stateSnapshot`.
    pub fn snapshot_state(&self) -> Result<()> {
        let snapshot = self.captured_state();
        self.inner.node.set_state_snapshot(snapshot);

        let root = self.root_checked()?;
        let observers = root.inner.observers.read().unwrap().clone();
        for obs in &observers {
            let node = self.node();
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| obs.on_state_updated(&node)));
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => root.logger().error(format!("observer onStateUpdated failed: {e}"), None),
                Err(_) => root.logger().error("observer onStateUpdated panicked".to_string(), None),
            }
        }

        self.emit_event(WorkflowEvent::StateSnapshot { node: self.node().downgrade() })
    }

    /// Appends `message` as an error log entry (guaranteeing `logs` below
    /// is never empty), then builds the `WorkflowError` payload for a
    /// failing step/task/run.
    pub(crate) fn capture_failure(&self, message: impl Into<String>, original: Value) -> crate::error::WorkflowError {
        let message = message.into();
        self.logger().error(message.clone(), None);
        crate::error::WorkflowError {
            message,
            original,
            workflow_id: self.id(),
            stack: None,
            state: self.captured_state(),
            logs: self.node().logs(),
        }
    }

    /// Appends `event` to this workflow's own node, then walks to the
    /// tree's root and fans it out to every observer (isolated per
    /// subscriber), finally delivering `on_tree_changed` for shape-changing
    /// events.
    pub(crate) fn emit_event(&self, event: WorkflowEvent) -> Result<()> {
        self.inner.node.append_event(event.clone());

        let root = self.root_checked()?;
        let observers = root.inner.observers.read().unwrap().clone();

        for obs in &observers {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| obs.on_event(&event)));
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => root.logger().error(format!("observer onEvent failed: {e}"), None),
                Err(_) => root.logger().error("observer onEvent panicked".to_string(), None),
            }
        }

        if event.triggers_tree_changed() {
            let root_node = root.node();
            for obs in &observers {
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| obs.on_tree_changed(&root_node)));
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => root.logger().error(format!("observer onTreeChanged failed: {e}"), None),
                    Err(_) => root.logger().error("observer onTreeChanged panicked".to_string(), None),
                }
            }
        }

        Ok(())
    }

    /// Delivers a log entry to the tree's root observers. Silently drops
    /// the entry if the tree has been corrupted into a cycle or this
    /// workflow has somehow outlived its own tree.
    pub(crate) fn dispatch_log(&self, entry: &crate::logger::LogEntry) {
        let root = match self.root_checked() {
            Ok(r) => r,
            Err(_) => return,
        };
        let observers = root.inner.observers.read().unwrap().clone();
        for obs in &observers {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| obs.on_log(entry)));
            if result.is_err() {
                let local = crate::logger::LogEntry {
                    id: crate::id::new_id(),
                    workflow_id: self.id(),
                    timestamp: crate::utils::time::time_millis(),
                    level: crate::logger::LogLevel::Error,
                    message: format!("onLog observer panicked while delivering entry {}", entry.id),
                    data: None,
                    parent_log_id: entry.parent_log_id.clone(),
                };
                self.inner.node.append_log(local);
            }
        }
    }

    /// Runs this workflow's unit of work: transitions to `running`, invokes
    /// the `WorkflowRun`/executor, then transitions to `completed` or
    /// `failed` (emitting an `error` event with captured state/logs on
    /// failure) before returning the result. On failure, the captured
    /// `WorkflowError` (carrying this workflow's own id/state/logs) is
    /// what's returned to the caller, so a parent `instrument_task` merging
    /// several failed children recovers each child's real id and logs
    /// rather than a bare, unattributed error.
    pub async fn run(&self) -> Result<Value> {
        self.set_status(WorkflowStatus::Running)?;

        let outcome = match &self.inner.run_kind {
            RunKind::None => Ok(Value::Null),
            RunKind::Subclass(run) => {
                let run = run.clone();
                let workflow = self.clone();
                run.run(&workflow).await
            }
            RunKind::Functional(executor) => {
                let ctx = crate::workflow_context::WorkflowContext::new(self.clone());
                let executor = executor.clone();
                executor(ctx).await
            }
        };

        match outcome {
            Ok(value) => {
                self.set_status(WorkflowStatus::Completed)?;
                Ok(value)
            }
            Err(err) => {
                let original = crate::error::error_to_original(&err);
                let workflow_error = self.capture_failure(err.to_string(), original);
                self.emit_event(WorkflowEvent::Error {
                    node: self.node().downgrade(),
                    error: workflow_error.clone(),
                })?;
                self.set_status(WorkflowStatus::Failed)?;
                Err(Error::StepFailure(workflow_error))
            }
        }
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_mirrors_both_trees_and_rejects_structural_violations() {
        let root = Workflow::new(Some("root"), None).unwrap();
        let child = Workflow::new(Some("child"), None).unwrap();
        root.attach_child(&child).unwrap();

        assert_eq!(root.children().len(), 1);
        assert_eq!(root.node().children().len(), 1);
        assert_eq!(child.parent().unwrap().id(), root.id());
        assert_eq!(child.node().parent().unwrap().id(), root.node().id());

        // self-attach
        assert!(matches!(root.attach_child(&root), Err(Error::TreeConstraintViolation(_))));
        // already has a parent
        let other = Workflow::new(Some("other"), None).unwrap();
        assert!(matches!(other.attach_child(&child), Err(Error::TreeConstraintViolation(_))));
        // duplicate attach
        assert!(matches!(root.attach_child(&child), Err(Error::TreeConstraintViolation(_))));
        // would form a cycle
        assert!(matches!(child.attach_child(&root), Err(Error::TreeConstraintViolation(_))));
    }

    #[test]
    fn reparenting_requires_an_explicit_detach() {
        let p1 = Workflow::new(Some("p1"), None).unwrap();
        let p2 = Workflow::new(Some("p2"), None).unwrap();
        p1.attach_child(&p2).unwrap(); // shared tree: p1 -> p2
        let x = Workflow::new(Some("x"), None).unwrap();

        p1.attach_child(&x).unwrap();
        assert!(matches!(p2.attach_child(&x), Err(Error::TreeConstraintViolation(_))));

        p1.detach_child(&x).unwrap();
        p2.attach_child(&x).unwrap();
        assert_eq!(x.parent().unwrap().id(), p2.id());
        assert_eq!(p1.children().len(), 1);
        assert_eq!(p2.children().len(), 1);
    }

    #[test]
    fn observers_may_only_attach_at_a_root() {
        let root = Workflow::new(Some("root"), None).unwrap();
        let child = Workflow::new(Some("child"), Some(&root)).unwrap();

        struct Noop;
        impl WorkflowObserver for Noop {
            fn on_log(&self, _e: &crate::logger::LogEntry) {}
            fn on_event(&self, _e: &WorkflowEvent) -> Result<()> {
                Ok(())
            }
            fn on_state_updated(&self, _n: &Node) -> Result<()> {
                Ok(())
            }
            fn on_tree_changed(&self, _r: &Node) -> Result<()> {
                Ok(())
            }
        }

        assert!(root.add_observer(Arc::new(Noop)).is_ok());
        assert!(matches!(child.add_observer(Arc::new(Noop)), Err(Error::TreeConstraintViolation(_))));
    }

    #[tokio::test]
    async fn run_transitions_idle_running_completed() {
        let wf = Workflow::new(Some("plain"), None).unwrap();
        assert_eq!(wf.status(), WorkflowStatus::Idle);
        wf.run().await.unwrap();
        assert_eq!(wf.status(), WorkflowStatus::Completed);
        assert_eq!(wf.node().status(), WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn a_failing_executor_fails_the_workflow_and_logs_non_empty() {
        let executor: Executor = Arc::new(|_ctx| {
            Box::pin(async { Err(Error::Other("kaboom".into())) })
        });
        let wf = Workflow::with_executor(Some("boom"), None, executor).unwrap();
        let err = wf.run().await.unwrap_err();
        assert_eq!(wf.status(), WorkflowStatus::Failed);
        let we = err.workflow_error().unwrap();
        assert!(!we.logs.is_empty());
        assert_eq!(we.workflow_id, wf.id());
    }
}
