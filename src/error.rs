use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error as ThisError;

use crate::logger::LogEntry;

/// The crate's result alias, exactly as `actflow::Result<T>` aliases `ActflowError`.
pub type Result<T> = std::result::Result<T, Error>;

/// Taxonomy of everything that can escape a public operation.
///
/// `ObserverDelivery`/`LoggerDelivery` failures are deliberately absent: per
/// the observer/logger isolation contract they are recovered locally and
/// never reach a caller.
#[derive(Debug, Clone, Serialize, Deserialize, ThisError)]
pub enum Error {
    #[error("step failed: {0}")]
    StepFailure(WorkflowError),

    #[error("task aggregate failure: {0}")]
    TaskAggregate(WorkflowError),

    /// Attach forming a cycle, self-attach, duplicate child, re-parent
    /// without detach, or an observer added on a non-root workflow.
    #[error("tree constraint violation: {0}")]
    TreeConstraintViolation(String),

    /// Discovered mid-walk (`root()`/`is_descendant_of`) on an already
    /// corrupted tree; fatal to the containing operation.
    #[error("cycle detected at '{0}'")]
    CycleDetected(String),

    #[error("execution context missing for operation '{0}'")]
    ContextMissing(String),

    #[error("invalid workflow name: {0}")]
    NameInvalid(String),

    #[error("reflection failed: {0}")]
    ReflectionTransient(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The `WorkflowError` payload, for the two variants that carry one.
    pub fn workflow_error(&self) -> Option<&WorkflowError> {
        match self {
            Error::StepFailure(e) | Error::TaskAggregate(e) => Some(e),
            _ => None,
        }
    }
}

/// The payload of an `error` event and of `Error::StepFailure`/`TaskAggregate`.
///
/// Distinct from `Error` itself: this is plain data, serializable and
/// replayable, not a Rust error type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowError {
    pub message: String,
    pub original: Value,
    pub workflow_id: String,
    pub stack: Option<String>,
    pub state: Map<String, Value>,
    pub logs: Vec<LogEntry>,
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Captures whatever failed as the `original` field of a `WorkflowError`:
/// another `WorkflowError` is preserved structurally, anything else is
/// flattened to its `Display` string.
pub fn error_to_original(err: &Error) -> Value {
    match err.workflow_error() {
        Some(we) => serde_json::to_value(we).unwrap_or(Value::Null),
        None => Value::String(err.to_string()),
    }
}

/// Recovers a `WorkflowError` from an arbitrary `Error`, synthesizing one
/// for variants that don't already carry one (so a merge never drops a
/// failed child's message).
pub fn error_into_workflow_error(err: &Error) -> WorkflowError {
    match err.workflow_error() {
        Some(we) => we.clone(),
        None => WorkflowError {
            message: err.to_string(),
            original: Value::String(err.to_string()),
            workflow_id: String::new(),
            stack: None,
            state: Map::new(),
            logs: Vec::new(),
        },
    }
}

/// How `instrument_task` combines failures from a `concurrent: true` task.
#[derive(Clone, Default)]
pub struct ErrorMergeStrategy {
    pub enabled: bool,
    pub max_merge_depth: Option<usize>,
    pub combine: Option<Arc<dyn Fn(&[WorkflowError]) -> WorkflowError + Send + Sync>>,
}

/// The default combine function: one message naming how many of how many
/// children failed, with every failed child's id, logs, and raw error
/// folded into `original`/`logs`.
pub fn default_merge(
    owner_id: &str,
    task_name: &str,
    total_children: usize,
    failed: &[WorkflowError],
    state: Map<String, Value>,
) -> WorkflowError {
    let failed_count = failed.len();
    let message =
        format!("{failed_count} of {total_children} concurrent child workflows failed in task '{task_name}'");
    let failed_workflow_ids: Vec<String> = failed.iter().map(|e| e.workflow_id.clone()).collect();
    let logs: Vec<LogEntry> = failed.iter().flat_map(|e| e.logs.clone()).collect();
    WorkflowError {
        message,
        original: json!({
            "errors": failed,
            "totalChildren": total_children,
            "failedChildren": failed_count,
            "failedWorkflowIds": failed_workflow_ids,
        }),
        workflow_id: owner_id.to_string(),
        stack: None,
        state,
        logs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(workflow_id: &str, message: &str) -> WorkflowError {
        WorkflowError {
            message: message.to_string(),
            original: Value::Null,
            workflow_id: workflow_id.to_string(),
            stack: None,
            state: Map::new(),
            logs: Vec::new(),
        }
    }

    #[test]
    fn default_merge_names_counts_and_ids() {
        let failed = vec![sample("b", "bad B"), sample("c", "bad C")];
        let merged = default_merge("owner", "fan-out", 3, &failed, Map::new());
        assert_eq!(merged.message, "2 of 3 concurrent child workflows failed in task 'fan-out'");
        assert_eq!(merged.workflow_id, "owner");
        assert_eq!(
            merged.original["failedWorkflowIds"],
            json!(["b", "c"])
        );
    }

    #[test]
    fn error_display_uses_workflow_error_message() {
        let err = Error::StepFailure(sample("x", "boom"));
        assert_eq!(err.to_string(), "step failed: boom");
    }
}
