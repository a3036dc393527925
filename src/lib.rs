//! Groundswell: a hierarchical workflow orchestration engine for
//! agent-driven programs.
//!
//! A [`Workflow`] is a node in a tree. Each workflow owns a mirrored,
//! read-only [`Node`] projection of its shape (id, name, status, children,
//! logs, events), carries ambient lifecycle status, and either runs a
//! [`WorkflowRun`] subclass or a functional [`Executor`] driven by a
//! [`WorkflowContext`]. Steps and tasks are instrumented with
//! [`instrument_step`]/[`instrument_task`], which emit [`WorkflowEvent`]s to
//! every [`WorkflowObserver`] registered at the tree's root. Failures carry
//! a [`WorkflowError`] with captured state and logs; concurrent task
//! failures settle all children before either fail-fast rethrowing the
//! first error or merging every failure via [`ErrorMergeStrategy`].
//! Retries are driven by reflect-decide rather than blind counting, via
//! [`ReflectionManager`].

mod builder;
mod collaborators;
mod config;
mod context;
mod debugger;
mod error;
mod events;
mod id;
mod logger;
mod node;
mod observable;
mod reflection;
mod state;
mod step_task;
mod utils;
mod workflow;
mod workflow_context;

pub use builder::WorkflowEngineBuilder;
pub use collaborators::{Agent, Cache, Mcp, Prompt, ToolResult};
pub use config::{GroundswellConfig, ReflectionDefaults};
pub use context::{EmitEventFn, ExecutionContext};
pub use debugger::{TreeDebugger, TreeStats};
pub use error::{
    default_merge, error_into_workflow_error, error_to_original, Error, ErrorMergeStrategy, Result, WorkflowError,
};
pub use events::{WorkflowEvent, WorkflowObserver};
pub use id::new_id;
pub use logger::{LogEntry, LogEntryMeta, LogLevel, Logger};
pub use node::{Node, NodeRef, NodeStatus};
pub use observable::{Disposer, Observable, Observer as Subscriber};
pub use reflection::{
    ReflectContext, ReflectDecision, ReflectionConfig, ReflectionLevel, ReflectionManager, ReflectionRecord,
};
pub use state::{capture_fields, capture_state, ObservedField, ObservedState, ObservedStateBag};
pub use step_task::{instrument_step, instrument_task, StepOptions, TaskOptions, TaskReturn};
pub use workflow::{Executor, Workflow, WorkflowRun, WorkflowStatus};
pub use workflow_context::{EventTreeHandle, WorkflowContext};
