use std::future::Future;
use std::sync::Arc;

use tokio::task_local;

use crate::error::{Error, Result};
use crate::events::WorkflowEvent;
use crate::node::Node;

/// A closure that forwards an event to the owning workflow. Boxed so
/// `ExecutionContext` can be cloned cheaply and carried across `.await`.
pub type EmitEventFn = Arc<dyn Fn(WorkflowEvent) + Send + Sync>;

/// The ambient, per-task execution context: which node is "current",
/// how to emit an event against it, and the id chain needed to build
/// `WorkflowError`s without threading a parameter through every call.
#[derive(Clone)]
pub struct ExecutionContext {
    pub workflow_node: Node,
    pub emit_event: EmitEventFn,
    pub workflow_id: String,
    pub parent_workflow_id: Option<String>,
}

task_local! {
    static CONTEXT: ExecutionContext;
}

impl ExecutionContext {
    pub fn new(
        workflow_node: Node,
        emit_event: EmitEventFn,
        workflow_id: String,
        parent_workflow_id: Option<String>,
    ) -> Self {
        Self { workflow_node, emit_event, workflow_id, parent_workflow_id }
    }

    /// Establishes `self` as the ambient context for the whole span of
    /// `fut`, including every nested `.await`. A nested `run` call
    /// overrides the context for its own span only; on return (or unwind)
    /// the outer context is restored exactly, since `task_local!` scoping
    /// is itself just a stack frame around the future.
    pub async fn run<F>(self, fut: F) -> F::Output
    where
        F: Future,
    {
        CONTEXT.scope(self, fut).await
    }

    /// Reads the ambient context, if one has been established on the
    /// current task.
    pub fn get() -> Option<ExecutionContext> {
        CONTEXT.try_with(|c| c.clone()).ok()
    }

    /// Like `get`, but fails with `Error::ContextMissing` naming the
    /// calling operation, for call sites where ambient context is required.
    pub fn require(op_name: &str) -> Result<ExecutionContext> {
        Self::get().ok_or_else(|| Error::ContextMissing(op_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    #[tokio::test]
    async fn propagates_across_nested_awaits_and_restores_on_exit() {
        let node = Node::new("root").unwrap();
        let ctx = ExecutionContext::new(node.clone(), Arc::new(|_| {}), "root-id".into(), None);

        assert!(ExecutionContext::get().is_none());

        ctx.run(async {
            assert_eq!(ExecutionContext::get().unwrap().workflow_id, "root-id");
            tokio::task::yield_now().await;
            assert_eq!(ExecutionContext::get().unwrap().workflow_id, "root-id");

            let inner_node = Node::new("inner").unwrap();
            let inner_ctx = ExecutionContext::new(inner_node, Arc::new(|_| {}), "inner-id".into(), Some("root-id".into()));
            inner_ctx
                .run(async {
                    assert_eq!(ExecutionContext::get().unwrap().workflow_id, "inner-id");
                })
                .await;

            // outer context restored after the nested scope returns
            assert_eq!(ExecutionContext::get().unwrap().workflow_id, "root-id");
        })
        .await;

        assert!(ExecutionContext::get().is_none());
    }

    #[tokio::test]
    async fn require_fails_with_context_missing_outside_a_scope() {
        let err = ExecutionContext::require("someOperation").unwrap_err();
        assert!(matches!(err, Error::ContextMissing(op) if op == "someOperation"));
    }
}
