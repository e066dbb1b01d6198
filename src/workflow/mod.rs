//! Workflow execution engine
//!
//! This module handles:
//! - Node model and workflow definitions
//! - Dependency graph construction and validation
//! - Resource pool and scheduling policies
//! - The per-run coordinating loop with retries, timeouts and cancellation
//! - Lifecycle events and the submission service
//!
//! # Example
//!
//! ```ignore
//! use dagflow::workflow::{
//!     NodeSpec, RunOptions, SchedulingPolicy, WorkflowDefinition, WorkflowService,
//! };
//!
//! let def = WorkflowDefinition::new("release")
//!     .node(NodeSpec::task("build", |_| async { Ok(json!("app.tar")) }))
//!     .node(NodeSpec::task("ship", |ctx| async move { ... }).depends_on(["build"]));
//!
//! let service = WorkflowService::new(RunOptions::default());
//! let run_id = service.submit(&def, Default::default(), None)?;
//! let report = service.wait(&run_id).await?;
//!
//! // Per-run options override the service defaults
//! let urgent = RunOptions {
//!     policy: SchedulingPolicy::DeadlineDriven,
//!     ..RunOptions::default()
//! };
//! let run_id = service.submit(&def, Default::default(), Some(urgent))?;
//! let report = service.wait(&run_id).await?;
//! ```

mod admission;
mod cancel;
mod definition;
mod error;
mod events;
mod executor;
mod graph;
mod node;
mod resources;
mod runner;
mod scheduler;
mod service;
mod shell;
mod state;

pub use admission::TokenBucket;
pub use cancel::CancellationToken;
pub use definition::{DEFAULT_RETRY_DELAY, Edge, NodeId, NodePolicy, NodeSpec, WorkflowDefinition};
pub use error::{NodeError, RunError, ServiceError, ValidationError};
pub use events::{
    ChannelSink, CollectingSink, EventKind, EventSink, FanoutSink, LifecycleEvent, NodeSpan,
    NullSink, SpanFactory, SpanOutcome, TracingSink, TracingSpans,
};
pub use executor::NodeBehavior;
pub use graph::{DependencyGraph, GraphNode, Incoming, Readiness, truthy};
pub use node::{
    ConditionFn, LoopFn, LoopStep, NodeConfig, NodeContext, NodeType, TaskFn, WaitFn,
    condition_fn, loop_fn, task_fn, wait_fn,
};
pub use resources::{PoolSnapshot, ResourcePool, Resources};
pub use runner::{
    DEFAULT_GRACE_PERIOD, DEFAULT_MAX_PARALLEL_TASKS, Engine, MAX_RETRY_DELAY, RunOptions, new_run_id,
};
pub use scheduler::{Candidate, Scheduler, SchedulingPolicy};
pub use service::{RunId, WorkflowService};
pub use shell::{ExpressionCondition, ShellEnv, ShellLoop, ShellTask, ShellWait};
pub use state::{
    NodeRuntime, NodeState, NodeStatus, RunReport, RunState, RunStats, RunStatus, SkipReason,
    millis,
};
