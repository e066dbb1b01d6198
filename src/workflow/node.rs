//! Node model: typed node configurations and the per-type behaviour traits
//! users implement to plug work into a graph.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::cancel::CancellationToken;
use super::definition::{NodeId, WorkflowDefinition};
use super::error::NodeError;

/// The five node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Task,
    Condition,
    Parallel,
    Loop,
    Wait,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeType::Task => "task",
            NodeType::Condition => "condition",
            NodeType::Parallel => "parallel",
            NodeType::Loop => "loop",
            NodeType::Wait => "wait",
        };
        f.write_str(name)
    }
}

/// What a node body sees while it runs.
///
/// `vars` is a snapshot of the run context taken at dispatch. Outputs of
/// completed nodes appear in it under their node id, and also in `outputs`.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub run_id: String,
    pub node_id: NodeId,
    pub attempt: u32,
    pub vars: Arc<serde_json::Map<String, Value>>,
    pub outputs: Arc<serde_json::Map<String, Value>>,
    pub cancel: CancellationToken,
}

impl NodeContext {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    /// Output of an upstream node, if it completed
    pub fn output_of(&self, node: &str) -> Option<&Value> {
        self.outputs.get(node)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Result of one loop iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopStep {
    Continue(Value),
    Break(Value),
}

/// Unit of work of a `task` node.
#[async_trait]
pub trait TaskFn: Send + Sync {
    async fn call(&self, ctx: &NodeContext) -> Result<Value, NodeError>;
}

/// Predicate of a `condition` node.
#[async_trait]
pub trait ConditionFn: Send + Sync {
    async fn evaluate(&self, ctx: &NodeContext) -> Result<bool, NodeError>;
}

/// Iteration function of a `loop` node. `previous` is the value produced by
/// the prior iteration.
#[async_trait]
pub trait LoopFn: Send + Sync {
    async fn step(
        &self,
        ctx: &NodeContext,
        iteration: u32,
        previous: Option<&Value>,
    ) -> Result<LoopStep, NodeError>;
}

/// Readiness predicate of a `wait` node.
#[async_trait]
pub trait WaitFn: Send + Sync {
    async fn is_ready(&self, ctx: &NodeContext) -> Result<bool, NodeError>;
}

/// Type-specific behaviour of a node.
#[derive(Clone)]
pub enum NodeConfig {
    Task(Arc<dyn TaskFn>),
    Condition(Arc<dyn ConditionFn>),
    Parallel {
        sub_workflows: Vec<WorkflowDefinition>,
    },
    Loop {
        step: Arc<dyn LoopFn>,
        max_iterations: u32,
    },
    Wait {
        condition: Arc<dyn WaitFn>,
        max_wait: Duration,
        check_interval: Duration,
    },
}

impl NodeConfig {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeConfig::Task(_) => NodeType::Task,
            NodeConfig::Condition(_) => NodeType::Condition,
            NodeConfig::Parallel { .. } => NodeType::Parallel,
            NodeConfig::Loop { .. } => NodeType::Loop,
            NodeConfig::Wait { .. } => NodeType::Wait,
        }
    }
}

impl fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeConfig::Task(_) => f.write_str("Task"),
            NodeConfig::Condition(_) => f.write_str("Condition"),
            NodeConfig::Parallel { sub_workflows } => f
                .debug_struct("Parallel")
                .field("sub_workflows", &sub_workflows.len())
                .finish(),
            NodeConfig::Loop { max_iterations, .. } => f
                .debug_struct("Loop")
                .field("max_iterations", max_iterations)
                .finish(),
            NodeConfig::Wait {
                max_wait,
                check_interval,
                ..
            } => f
                .debug_struct("Wait")
                .field("max_wait", max_wait)
                .field("check_interval", check_interval)
                .finish(),
        }
    }
}

// Closure adapters. Each clones the context so closures can take it by value.

struct FnTask<F>(F);
struct FnCondition<F>(F);
struct FnLoop<F>(F);
struct FnWait<F>(F);

#[async_trait]
impl<F, Fut> TaskFn for FnTask<F>
where
    F: Fn(NodeContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, NodeError>> + Send,
{
    async fn call(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        (self.0)(ctx.clone()).await
    }
}

#[async_trait]
impl<F, Fut> ConditionFn for FnCondition<F>
where
    F: Fn(NodeContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, NodeError>> + Send,
{
    async fn evaluate(&self, ctx: &NodeContext) -> Result<bool, NodeError> {
        (self.0)(ctx.clone()).await
    }
}

#[async_trait]
impl<F, Fut> LoopFn for FnLoop<F>
where
    F: Fn(NodeContext, u32, Option<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<LoopStep, NodeError>> + Send,
{
    async fn step(
        &self,
        ctx: &NodeContext,
        iteration: u32,
        previous: Option<&Value>,
    ) -> Result<LoopStep, NodeError> {
        (self.0)(ctx.clone(), iteration, previous.cloned()).await
    }
}

#[async_trait]
impl<F, Fut> WaitFn for FnWait<F>
where
    F: Fn(NodeContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, NodeError>> + Send,
{
    async fn is_ready(&self, ctx: &NodeContext) -> Result<bool, NodeError> {
        (self.0)(ctx.clone()).await
    }
}

/// Wrap an async closure as a task body
pub fn task_fn<F, Fut>(f: F) -> Arc<dyn TaskFn>
where
    F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, NodeError>> + Send + 'static,
{
    Arc::new(FnTask(f))
}

/// Wrap an async closure as a condition predicate
pub fn condition_fn<F, Fut>(f: F) -> Arc<dyn ConditionFn>
where
    F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, NodeError>> + Send + 'static,
{
    Arc::new(FnCondition(f))
}

/// Wrap an async closure as a loop iteration function
pub fn loop_fn<F, Fut>(f: F) -> Arc<dyn LoopFn>
where
    F: Fn(NodeContext, u32, Option<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<LoopStep, NodeError>> + Send + 'static,
{
    Arc::new(FnLoop(f))
}

/// Wrap an async closure as a wait predicate
pub fn wait_fn<F, Fut>(f: F) -> Arc<dyn WaitFn>
where
    F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, NodeError>> + Send + 'static,
{
    Arc::new(FnWait(f))
}
