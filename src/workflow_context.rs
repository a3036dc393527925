use std::future::Future;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::collaborators::{Agent, Prompt};
use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::events::WorkflowEvent;
use crate::node::{Node, NodeStatus};
use crate::reflection::{ReflectContext, ReflectionManager};
use crate::step_task::{instrument_step, StepOptions};
use crate::workflow::Workflow;

/// A read-only, continuously-rebuilt view over the live node tree, handed
/// to functional-mode executors so they can navigate without walking
/// `Workflow` handles directly.
#[derive(Clone)]
pub struct EventTreeHandle {
    root: Arc<RwLock<Option<Node>>>,
}

impl EventTreeHandle {
    pub(crate) fn new(root: Node) -> Self {
        Self { root: Arc::new(RwLock::new(Some(root))) }
    }

    pub(crate) fn rebuild(&self, root: Node) {
        *self.root.write().unwrap() = Some(root);
    }

    pub fn get_node(&self, id: &str) -> Option<Node> {
        self.root.read().unwrap().as_ref().and_then(|r| find_node(r, id))
    }

    pub fn get_children(&self, id: &str) -> Vec<Node> {
        self.get_node(id).map(|n| n.children()).unwrap_or_default()
    }

    pub fn get_ancestors(&self, id: &str) -> Vec<Node> {
        let mut out = Vec::new();
        let mut current = self.get_node(id).and_then(|n| n.parent());
        while let Some(n) = current {
            current = n.parent();
            out.push(n);
        }
        out
    }

    pub fn to_json(&self) -> Value {
        self.root.read().unwrap().as_ref().map(node_to_json).unwrap_or(Value::Null)
    }
}

fn find_node(node: &Node, id: &str) -> Option<Node> {
    if node.id() == id {
        return Some(node.clone());
    }
    node.children().iter().find_map(|c| find_node(c, id))
}

fn node_to_json(node: &Node) -> Value {
    serde_json::json!({
        "id": node.id(),
        "name": node.name(),
        "status": node.status().as_ref(),
        "children": node.children().iter().map(node_to_json).collect::<Vec<_>>(),
    })
}

/// The functional-mode executor surface: `step`/`spawn_workflow`/
/// `replace_last_prompt_result`, plus the `EventTreeHandle` and state
/// registration an executor needs in place of decorator-driven machinery.
pub struct WorkflowContext {
    owner: Workflow,
    reflection: ReflectionManager,
    event_tree: EventTreeHandle,
}

impl WorkflowContext {
    pub(crate) fn new(owner: Workflow) -> Self {
        let event_tree = EventTreeHandle::new(owner.root_node());
        Self { owner, reflection: ReflectionManager::default(), event_tree }
    }

    pub fn with_reflection(mut self, reflection: ReflectionManager) -> Self {
        self.reflection = reflection;
        self
    }

    pub fn event_tree(&self) -> &EventTreeHandle {
        &self.event_tree
    }

    pub fn owner(&self) -> &Workflow {
        &self.owner
    }

    pub fn set_state(&self, key: impl Into<String>, value: impl Into<Value>, redact: bool, hidden: bool) {
        self.owner.set_state_field(key, value, redact, hidden);
    }

    /// Runs `f` as an instrumented step, creating a fresh child workflow
    /// per attempt (named `"{name}"`, then `"{name} (retry N)"`) and
    /// driving reflection-based retry on failure. `f` receives the
    /// previous attempt's revised prompt, if any (`None` on the first try).
    pub async fn step<F, Fut, T>(&self, name: &str, f: F) -> Result<T>
    where
        F: Fn(Option<Value>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 1;
        let mut revised_prompt: Option<Value> = None;

        loop {
            let step_name = if attempt == 1 { name.to_string() } else { format!("{name} (retry {})", attempt - 1) };
            let child = Workflow::new(Some(&step_name), Some(&self.owner))?;
            child.set_status(NodeStatus::Running)?;

            let emit = {
                let child = child.clone();
                Arc::new(move |e: WorkflowEvent| {
                    let _ = child.emit_event(e);
                }) as crate::context::EmitEventFn
            };
            let exec_ctx = ExecutionContext::new(child.node(), emit, child.id(), Some(self.owner.id()));

            let fut = {
                let revised_prompt = revised_prompt.clone();
                instrument_step(&child, StepOptions::default(), &step_name, move || f(revised_prompt))
            };
            let result = exec_ctx.run(fut).await;

            self.event_tree.rebuild(self.owner.root_node());

            match result {
                Ok(value) => {
                    child.set_status(NodeStatus::Completed)?;
                    if attempt > 1 {
                        self.reflection.mark_last_reflection_successful();
                    }
                    return Ok(value);
                }
                Err(err) => {
                    child.set_status(NodeStatus::Failed)?;
                    if self.reflection.is_enabled() && attempt < self.reflection.max_attempts() {
                        child.emit_event(WorkflowEvent::ReflectionStart { level: self.reflection.level(), attempt })?;
                        let decision = self.reflection.reflect(ReflectContext {
                            step_name: name.to_string(),
                            attempt,
                            error: err.clone(),
                        });
                        match decision {
                            Ok(decision) => {
                                child.emit_event(WorkflowEvent::ReflectionEnd {
                                    level: self.reflection.level(),
                                    attempt,
                                    should_retry: decision.should_retry,
                                })?;
                                if decision.should_retry {
                                    revised_prompt = decision.revised_prompt;
                                    attempt += 1;
                                    continue;
                                }
                            }
                            Err(_reflect_err) => {
                                // original step exception re-thrown unchanged below
                            }
                        }
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Attaches `workflow` under the owner (if not already parented) and
    /// runs it to completion.
    pub async fn spawn_workflow(&self, workflow: &Workflow) -> Result<Value> {
        if workflow.parent().is_none() {
            self.owner.attach_child(workflow)?;
        }
        let result = workflow.run().await;
        self.event_tree.rebuild(self.owner.root_node());
        result
    }

    /// Revises the last completed child's result by issuing `new_prompt`
    /// to `agent` inside a fresh `revision:<promptId>` child step.
    pub async fn replace_last_prompt_result(&self, new_prompt: &dyn Prompt, agent: &dyn Agent) -> Result<Value> {
        let last = self
            .owner
            .last_completed_child()
            .ok_or_else(|| Error::Other("no completed child to revise".into()))?;
        last.logger().info(
            format!("revised by prompt '{}'", new_prompt.id()),
            Some(serde_json::json!({ "revisionId": new_prompt.id() })),
        );

        let revision_name = format!("revision:{}", new_prompt.id());
        let revision = Workflow::new(Some(&revision_name), Some(&self.owner))?;
        revision.set_status(NodeStatus::Running)?;

        let emit = {
            let revision = revision.clone();
            Arc::new(move |e: WorkflowEvent| {
                let _ = revision.emit_event(e);
            }) as crate::context::EmitEventFn
        };
        let exec_ctx = ExecutionContext::new(revision.node(), emit, revision.id(), Some(self.owner.id()));

        let outcome = exec_ctx
            .run(instrument_step(&revision, StepOptions::default(), &revision_name, || async {
                agent.prompt(new_prompt).await
            }))
            .await;

        match &outcome {
            Ok(_) => revision.set_status(NodeStatus::Completed)?,
            Err(_) => revision.set_status(NodeStatus::Failed)?,
        }
        self.event_tree.rebuild(self.owner.root_node());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflection::ReflectionConfig;
    use crate::workflow::{Executor, WorkflowStatus};
    use std::pin::Pin;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn step_retries_via_reflection_and_records_history() {
        let calls = Arc::new(AtomicU32::new(0));

        let executor: Executor = {
            let calls = calls.clone();
            Arc::new(move |ctx: WorkflowContext| {
                let calls = calls.clone();
                Box::pin(async move {
                    let reflecting = ctx.with_reflection(ReflectionManager::new(ReflectionConfig {
                        enabled: true,
                        max_attempts: 2,
                        ..Default::default()
                    }));
                    let result = reflecting
                        .step("S", |_revised| {
                            let calls = calls.clone();
                            async move {
                                let n = calls.fetch_add(1, Ordering::SeqCst);
                                if n == 0 {
                                    Err(Error::Other("first attempt fails".into()))
                                } else {
                                    Ok(Value::String("done".into()))
                                }
                            }
                        })
                        .await?;
                    Ok(result)
                }) as Pin<Box<dyn Future<Output = Result<Value>> + Send>>
            })
        };

        let wf = Workflow::with_executor(Some("root"), None, executor).unwrap();
        let result = wf.run().await.unwrap();
        assert_eq!(result, Value::String("done".into()));

        let step_children = wf.children();
        assert_eq!(step_children.len(), 2);
        assert_eq!(step_children[0].name(), "S");
        assert_eq!(step_children[0].status(), WorkflowStatus::Failed);
        assert_eq!(step_children[1].name(), "S (retry 1)");
        assert_eq!(step_children[1].status(), WorkflowStatus::Completed);
    }
}
