use std::collections::HashSet;
use std::future::Future;
use std::time::Instant;

use serde_json::Value;

use crate::error::{default_merge, error_into_workflow_error, error_to_original, Error, ErrorMergeStrategy, Result};
use crate::events::WorkflowEvent;
use crate::workflow::Workflow;

/// Options accepted by `instrument_step`.
#[derive(Clone)]
pub struct StepOptions {
    pub name: Option<String>,
    pub snapshot_state: bool,
    pub track_timing: bool,
    pub log_start: bool,
    pub log_finish: bool,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self { name: None, snapshot_state: false, track_timing: true, log_start: false, log_finish: false }
    }
}

/// The translation of the `@Step` decorator: wraps `f` with `stepStart`/
/// `stepEnd` events (and, on failure, an `error` event carrying a
/// `WorkflowError` with captured state/logs), against `owner`'s node.
pub async fn instrument_step<F, Fut, T>(owner: &Workflow, opts: StepOptions, step_name: &str, f: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let name = opts.name.clone().unwrap_or_else(|| step_name.to_string());
    let start = Instant::now();

    owner.emit_event(WorkflowEvent::StepStart { node: owner.node().downgrade(), step: name.clone() })?;
    if opts.log_start {
        owner.logger().info(format!("step '{name}' started"), None);
    }

    match f().await {
        Ok(value) => {
            if opts.track_timing {
                let duration_ms = start.elapsed().as_millis() as u64;
                owner.emit_event(WorkflowEvent::StepEnd {
                    node: owner.node().downgrade(),
                    step: name.clone(),
                    duration_ms,
                })?;
            }
            if opts.log_finish {
                owner.logger().info(format!("step '{name}' finished"), None);
            }
            if opts.snapshot_state {
                owner.snapshot_state()?;
            }
            Ok(value)
        }
        Err(err) => {
            let original = error_to_original(&err);
            let workflow_error = owner.capture_failure(format!("step '{name}' failed: {err}"), original);
            owner.emit_event(WorkflowEvent::Error { node: owner.node().downgrade(), error: workflow_error.clone() })?;
            Err(Error::StepFailure(workflow_error))
        }
    }
}

/// Options accepted by `instrument_task`.
#[derive(Clone, Default)]
pub struct TaskOptions {
    pub name: Option<String>,
    pub concurrent: bool,
    pub error_merge_strategy: Option<ErrorMergeStrategy>,
}

/// What a task-wrapped closure may return: a set of workflow-shaped
/// children to auto-attach (and, if `concurrent`, run and settle), or any
/// other value, preserved untouched.
pub enum TaskReturn {
    Workflows(Vec<Workflow>),
    Other(Value),
}

/// The translation of the `@Task` decorator: wraps `f` with `taskStart`/
/// `taskEnd` events. If `f` returns workflow-shaped children, auto-attaches
/// any that aren't already parented; if `concurrent`, runs them all to
/// settlement and either rethrows the first failure (fail-fast) or emits
/// a merged `error` event built by `error_merge_strategy`/`default_merge`.
pub async fn instrument_task<F, Fut>(owner: &Workflow, opts: TaskOptions, task_name: &str, f: F) -> Result<TaskReturn>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<TaskReturn>>,
{
    let name = opts.name.clone().unwrap_or_else(|| task_name.to_string());
    owner.emit_event(WorkflowEvent::TaskStart { node: owner.node().downgrade(), task: name.clone() })?;

    let outcome = f().await?;

    let children = match &outcome {
        TaskReturn::Workflows(children) => children.clone(),
        TaskReturn::Other(_) => {
            owner.emit_event(WorkflowEvent::TaskEnd { node: owner.node().downgrade(), task: name.clone() })?;
            return Ok(outcome);
        }
    };

    let mut seen = HashSet::new();
    for child in &children {
        if !seen.insert(child.id()) {
            continue;
        }
        if child.parent().is_none() {
            if let Err(e) = owner.attach_child(child) {
                if !matches!(e, Error::TreeConstraintViolation(_)) {
                    return Err(e);
                }
            }
        }
    }

    if opts.concurrent {
        let total = children.len();
        let results = futures::future::join_all(children.iter().map(|c| {
            let c = c.clone();
            async move { c.run().await }
        }))
        .await;

        let failures: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();

        if !failures.is_empty() {
            let merge = opts.error_merge_strategy.clone().unwrap_or_default();
            if !merge.enabled {
                let first = error_into_workflow_error(failures[0]);
                return Err(Error::StepFailure(first));
            }

            let workflow_errors: Vec<_> = failures.iter().map(|e| error_into_workflow_error(*e)).collect();
            let merged = if let Some(combine) = &merge.combine {
                combine(&workflow_errors)
            } else {
                default_merge(&owner.id(), &name, total, &workflow_errors, owner.captured_state())
            };

            owner.emit_event(WorkflowEvent::Error { node: owner.node().downgrade(), error: merged.clone() })?;
            return Err(Error::TaskAggregate(merged));
        }
    }

    owner.emit_event(WorkflowEvent::TaskEnd { node: owner.node().downgrade(), task: name.clone() })?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Executor, WorkflowStatus};
    use std::pin::Pin;

    fn executor_ok(value: &'static str) -> Executor {
        std::sync::Arc::new(move |_ctx| {
            Box::pin(async move { Ok(Value::String(value.to_string())) }) as Pin<Box<dyn Future<Output = Result<Value>> + Send>>
        })
    }

    fn executor_err(message: &'static str) -> Executor {
        std::sync::Arc::new(move |_ctx| {
            Box::pin(async move { Err(Error::Other(message.to_string())) }) as Pin<Box<dyn Future<Output = Result<Value>> + Send>>
        })
    }

    #[tokio::test]
    async fn instrument_step_emits_start_end_and_returns_value() {
        let owner = Workflow::new(Some("owner"), None).unwrap();
        let result = instrument_step(&owner, StepOptions::default(), "doWork", || async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        let kinds: Vec<_> = owner.node().events().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["stepStart", "stepEnd"]);
    }

    #[tokio::test]
    async fn concurrent_task_mixed_failures_fail_fast_without_merge() {
        let owner = Workflow::new(Some("owner"), None).unwrap();
        let a = Workflow::with_executor(Some("A"), None, executor_ok("ok-a")).unwrap();
        let b = Workflow::with_executor(Some("B"), None, executor_err("bad B")).unwrap();
        let c = Workflow::with_executor(Some("C"), None, executor_ok("ok-c")).unwrap();

        let children = vec![a, b, c];
        let result = instrument_task(&owner, TaskOptions { concurrent: true, ..Default::default() }, "fanout", || async {
            Ok(TaskReturn::Workflows(children))
        })
        .await;

        let err = result.unwrap_err();
        match err {
            Error::StepFailure(we) => assert_eq!(we.message, "bad B"),
            other => panic!("expected StepFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_task_merges_failures_when_enabled() {
        let owner = Workflow::new(Some("owner"), None).unwrap();
        let a = Workflow::with_executor(Some("A"), None, executor_err("fail A")).unwrap();
        let b = Workflow::with_executor(Some("B"), None, executor_ok("ok-b")).unwrap();
        let c = Workflow::with_executor(Some("C"), None, executor_err("fail C")).unwrap();
        let (a_id, c_id) = (a.id(), c.id());

        let children = vec![a, b, c];
        let result = instrument_task(
            &owner,
            TaskOptions {
                concurrent: true,
                error_merge_strategy: Some(ErrorMergeStrategy { enabled: true, ..Default::default() }),
                ..Default::default()
            },
            "fanout",
            || async { Ok(TaskReturn::Workflows(children)) },
        )
        .await;

        let err = result.unwrap_err();
        match err {
            Error::TaskAggregate(we) => {
                assert_eq!(we.message, "2 of 3 concurrent child workflows failed in task 'fanout'");
                // Each failing child's own id/logs survive the merge instead of
                // being flattened into an unattributed, logless error.
                let ids = we.original["failedWorkflowIds"].as_array().cloned().unwrap_or_default();
                assert_eq!(ids, vec![Value::String(a_id), Value::String(c_id)]);
                assert!(!we.logs.is_empty());
            }
            other => panic!("expected TaskAggregate, got {other:?}"),
        }
        assert_eq!(owner.children().len(), 3);
        assert!(owner.children().iter().any(|c| c.status() == WorkflowStatus::Completed));
    }
}
