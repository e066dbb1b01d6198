//! Declarative workflow definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::time::Duration;

use super::error::NodeError;
use super::node::{
    LoopStep, NodeConfig, NodeContext, NodeType, condition_fn, loop_fn, task_fn, wait_fn,
};
use super::resources::Resources;

pub type NodeId = String;

/// Default delay before the first retry
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Directed connection between two nodes. With a `condition`, the edge only
/// enables `to` when the truthiness of `from`'s output equals it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<bool>,
}

impl Edge {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
        }
    }

    pub fn when(mut self, condition: bool) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// Retry, timeout, scheduling and resource policy shared by every node type.
#[derive(Debug, Clone, PartialEq)]
pub struct NodePolicy {
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub timeout: Option<Duration>,
    /// 1 (lowest) to 10. Derived from deadline and fan-in when absent.
    pub priority: Option<u8>,
    pub deadline: Option<DateTime<Utc>>,
    pub resources: Resources,
    /// Overrides the structural critical-path analysis
    pub critical: Option<bool>,
}

impl Default for NodePolicy {
    fn default() -> Self {
        Self {
            retry_attempts: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
            timeout: None,
            priority: None,
            deadline: None,
            resources: Resources::ZERO,
            critical: None,
        }
    }
}

impl NodePolicy {
    /// Delay after failed attempt `attempt` (1-based): `retry_delay * 2^(attempt-1)`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.retry_delay.saturating_mul(1u32 << exponent)
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry_attempts.saturating_add(1)
    }
}

/// One node of a workflow definition.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: NodeId,
    pub config: NodeConfig,
    pub policy: NodePolicy,
    pub dependencies: BTreeSet<NodeId>,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, config: NodeConfig) -> Self {
        Self {
            id: id.into(),
            config,
            policy: NodePolicy::default(),
            dependencies: BTreeSet::new(),
        }
    }

    pub fn task<F, Fut>(id: impl Into<NodeId>, f: F) -> Self
    where
        F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, NodeError>> + Send + 'static,
    {
        Self::new(id, NodeConfig::Task(task_fn(f)))
    }

    pub fn condition<F, Fut>(id: impl Into<NodeId>, f: F) -> Self
    where
        F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, NodeError>> + Send + 'static,
    {
        Self::new(id, NodeConfig::Condition(condition_fn(f)))
    }

    pub fn looping<F, Fut>(id: impl Into<NodeId>, max_iterations: u32, f: F) -> Self
    where
        F: Fn(NodeContext, u32, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<LoopStep, NodeError>> + Send + 'static,
    {
        Self::new(
            id,
            NodeConfig::Loop {
                step: loop_fn(f),
                max_iterations,
            },
        )
    }

    pub fn wait<F, Fut>(
        id: impl Into<NodeId>,
        max_wait: Duration,
        check_interval: Duration,
        f: F,
    ) -> Self
    where
        F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, NodeError>> + Send + 'static,
    {
        Self::new(
            id,
            NodeConfig::Wait {
                condition: wait_fn(f),
                max_wait,
                check_interval,
            },
        )
    }

    pub fn parallel(id: impl Into<NodeId>, sub_workflows: Vec<WorkflowDefinition>) -> Self {
        Self::new(id, NodeConfig::Parallel { sub_workflows })
    }

    pub fn node_type(&self) -> NodeType {
        self.config.node_type()
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.policy.retry_attempts = attempts;
        self.policy.retry_delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.policy.timeout = Some(timeout);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.policy.priority = Some(priority);
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.policy.deadline = Some(deadline);
        self
    }

    pub fn with_resources(mut self, resources: Resources) -> Self {
        self.policy.resources = resources;
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.policy.critical = Some(critical);
        self
    }
}

/// A set of nodes plus the connections between them.
///
/// A node's effective upstream set is its `dependencies` plus the `from` of
/// every connection pointing at it.
#[derive(Debug, Clone, Default)]
pub struct WorkflowDefinition {
    pub name: String,
    pub nodes: BTreeMap<String, NodeSpec>,
    pub connections: Vec<Edge>,
    /// Terminal markers. Sink nodes when empty.
    pub end_nodes: Vec<NodeId>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a node keyed by its id
    pub fn node(mut self, spec: NodeSpec) -> Self {
        self.nodes.insert(spec.id.clone(), spec);
        self
    }

    pub fn connect(mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        self.connections.push(Edge::new(from, to));
        self
    }

    pub fn connect_when(
        mut self,
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        condition: bool,
    ) -> Self {
        self.connections.push(Edge::new(from, to).when(condition));
        self
    }

    pub fn end(mut self, node: impl Into<NodeId>) -> Self {
        self.end_nodes.push(node.into());
        self
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
