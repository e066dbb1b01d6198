//! Per-type node execution, resolved once when the graph is built

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

use super::error::NodeError;
use super::graph::DependencyGraph;
use super::node::{ConditionFn, LoopFn, LoopStep, NodeConfig, NodeContext, TaskFn, WaitFn};
use super::runner::{Engine, instant_after};
use super::state::{RunState, millis};

/// Uniform execution contract shared by every node type.
#[async_trait]
pub trait NodeBehavior: Send + Sync {
    async fn execute(&self, ctx: &NodeContext, engine: &Engine) -> Result<Value, NodeError>;
}

/// Pick the behaviour for a node configuration. Parallel nodes receive their
/// sub-workflows already built.
pub(crate) fn resolve_behavior(
    config: &NodeConfig,
    sub_graphs: Vec<Arc<DependencyGraph>>,
) -> Arc<dyn NodeBehavior> {
    match config {
        NodeConfig::Task(task) => Arc::new(TaskNode {
            task: Arc::clone(task),
        }),
        NodeConfig::Condition(condition) => Arc::new(ConditionNode {
            condition: Arc::clone(condition),
        }),
        NodeConfig::Loop {
            step,
            max_iterations,
        } => Arc::new(LoopNode {
            step: Arc::clone(step),
            max_iterations: *max_iterations,
        }),
        NodeConfig::Wait {
            condition,
            max_wait,
            check_interval,
        } => Arc::new(WaitNode {
            condition: Arc::clone(condition),
            max_wait: *max_wait,
            check_interval: *check_interval,
        }),
        NodeConfig::Parallel { .. } => Arc::new(ParallelNode { sub_graphs }),
    }
}

struct TaskNode {
    task: Arc<dyn TaskFn>,
}

#[async_trait]
impl NodeBehavior for TaskNode {
    async fn execute(&self, ctx: &NodeContext, _engine: &Engine) -> Result<Value, NodeError> {
        self.task.call(ctx).await
    }
}

struct ConditionNode {
    condition: Arc<dyn ConditionFn>,
}

#[async_trait]
impl NodeBehavior for ConditionNode {
    async fn execute(&self, ctx: &NodeContext, _engine: &Engine) -> Result<Value, NodeError> {
        self.condition.evaluate(ctx).await.map(Value::Bool)
    }
}

struct LoopNode {
    step: Arc<dyn LoopFn>,
    max_iterations: u32,
}

#[async_trait]
impl NodeBehavior for LoopNode {
    async fn execute(&self, ctx: &NodeContext, _engine: &Engine) -> Result<Value, NodeError> {
        let mut previous: Option<Value> = None;
        for iteration in 1..=self.max_iterations {
            if ctx.is_cancelled() {
                return Err(NodeError::Cancelled);
            }
            match self.step.step(ctx, iteration, previous.as_ref()).await? {
                LoopStep::Break(value) => {
                    tracing::debug!(node_id = %ctx.node_id, iteration, "Loop finished");
                    return Ok(value);
                }
                LoopStep::Continue(value) => previous = Some(value),
            }
        }
        Err(NodeError::LoopLimitExceeded {
            max_iterations: self.max_iterations,
        })
    }
}

struct WaitNode {
    condition: Arc<dyn WaitFn>,
    max_wait: Duration,
    check_interval: Duration,
}

#[async_trait]
impl NodeBehavior for WaitNode {
    async fn execute(&self, ctx: &NodeContext, _engine: &Engine) -> Result<Value, NodeError> {
        let started = Instant::now();
        let deadline = instant_after(self.max_wait);
        let mut checks: u64 = 0;

        loop {
            checks += 1;
            if self.condition.is_ready(ctx).await? {
                return Ok(json!({
                    "waited_ms": millis(started.elapsed()),
                    "checks": checks,
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(NodeError::WaitTimeout {
                    max_wait: self.max_wait,
                });
            }

            let next_check = (now + self.check_interval).min(deadline);
            tokio::select! {
                _ = tokio::time::sleep_until(next_check) => {}
                _ = ctx.cancel.cancelled() => return Err(NodeError::Cancelled),
            }
        }
    }
}

struct ParallelNode {
    sub_graphs: Vec<Arc<DependencyGraph>>,
}

#[async_trait]
impl NodeBehavior for ParallelNode {
    async fn execute(&self, ctx: &NodeContext, engine: &Engine) -> Result<Value, NodeError> {
        let total = self.sub_graphs.len();
        let cancel = ctx.cancel.child();
        let mut runs = JoinSet::new();

        for (index, graph) in self.sub_graphs.iter().enumerate() {
            let engine = engine.clone();
            let graph = Arc::clone(graph);
            let run_id = format!("{}/{}#{}", ctx.run_id, ctx.node_id, index);
            let initial = (*ctx.vars).clone();
            let cancel = cancel.clone();
            runs.spawn(async move {
                let report = engine.execute(run_id, graph, initial, cancel, None).await;
                (index, report)
            });
        }

        let mut outputs: Vec<Value> = vec![Value::Null; total];
        let mut errors = Vec::new();
        let mut cancelled = false;

        while let Some(joined) = runs.join_next().await {
            match joined {
                Ok((index, report)) => {
                    // Best-effort failures leave the sub-run completed
                    let failed: Vec<String> = report
                        .failures()
                        .into_iter()
                        .map(|(node, e)| format!("sub-workflow {index}: {node}: {e}"))
                        .collect();
                    match report.state {
                        RunState::Completed if failed.is_empty() => {
                            outputs[index] = Value::Object(report.context);
                        }
                        RunState::Completed => errors.extend(failed),
                        RunState::Cancelled => cancelled = true,
                        _ => {
                            let detail = report
                                .error
                                .as_ref()
                                .map(|e| e.to_string())
                                .unwrap_or_else(|| "run failed".to_string());
                            errors.push(format!("sub-workflow {index}: {detail}"));
                        }
                    }
                }
                Err(e) => errors.push(format!("sub-workflow task failed: {e}")),
            }
        }

        if cancelled && errors.is_empty() {
            return Err(NodeError::Cancelled);
        }
        if !errors.is_empty() {
            return Err(NodeError::SubWorkflow { total, errors });
        }
        Ok(Value::Array(outputs))
    }
}
