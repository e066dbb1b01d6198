//! Dependency graph: validated node set, topological order, readiness and
//! critical-path analysis

use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use super::definition::{NodeId, NodePolicy, WorkflowDefinition};
use super::error::{NodeError, ValidationError};
use super::executor::{NodeBehavior, resolve_behavior};
use super::node::{NodeConfig, NodeType};
use super::state::{NodeRuntime, NodeState, SkipReason};

/// An incoming connection as seen from its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incoming {
    pub from: NodeId,
    pub condition: Option<bool>,
}

/// A node after validation, with its behaviour resolved.
pub struct GraphNode {
    pub id: NodeId,
    pub node_type: NodeType,
    pub policy: NodePolicy,
    /// Explicit dependencies plus connection sources
    pub dependencies: BTreeSet<NodeId>,
    pub incoming: Vec<Incoming>,
    pub dependents: BTreeSet<NodeId>,
    pub critical: bool,
    pub(crate) behavior: Arc<dyn NodeBehavior>,
}

impl std::fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphNode")
            .field("id", &self.id)
            .field("node_type", &self.node_type)
            .field("dependencies", &self.dependencies)
            .field("critical", &self.critical)
            .finish()
    }
}

/// Result of checking whether a pending node can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Some dependency has not resolved yet
    Blocked,
    Ready,
    /// The node can never run
    Skip(SkipReason),
}

/// Immutable, validated graph shared by every run of a definition.
#[derive(Debug)]
pub struct DependencyGraph {
    name: String,
    nodes: HashMap<NodeId, GraphNode>,
    order: Vec<NodeId>,
    end_nodes: Vec<NodeId>,
}

impl DependencyGraph {
    /// Validate a definition and build its graph. Fails on the first problem;
    /// no partial graph is ever returned.
    pub fn build(def: &WorkflowDefinition) -> Result<Self, ValidationError> {
        let mut nodes: HashMap<NodeId, GraphNode> = HashMap::with_capacity(def.nodes.len());

        for (key, spec) in &def.nodes {
            if key != &spec.id {
                return Err(ValidationError::IdMismatch {
                    key: key.clone(),
                    id: spec.id.clone(),
                });
            }
            validate_policy(&spec.id, &spec.policy)?;
            let sub_graphs = validate_config(&spec.id, &spec.config)?;

            nodes.insert(
                spec.id.clone(),
                GraphNode {
                    id: spec.id.clone(),
                    node_type: spec.node_type(),
                    policy: spec.policy.clone(),
                    dependencies: BTreeSet::new(),
                    incoming: Vec::new(),
                    dependents: BTreeSet::new(),
                    critical: false,
                    behavior: resolve_behavior(&spec.config, sub_graphs),
                },
            );
        }

        // Explicit dependencies become unconditional incoming edges
        let mut incoming: Vec<(NodeId, Incoming)> = Vec::new();
        for spec in def.nodes.values() {
            for dep in &spec.dependencies {
                if !nodes.contains_key(dep) {
                    return Err(ValidationError::UnknownDependency {
                        node: spec.id.clone(),
                        dependency: dep.clone(),
                    });
                }
                incoming.push((
                    spec.id.clone(),
                    Incoming {
                        from: dep.clone(),
                        condition: None,
                    },
                ));
            }
        }
        for edge in &def.connections {
            if !nodes.contains_key(&edge.from) || !nodes.contains_key(&edge.to) {
                return Err(ValidationError::InvalidEdge {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                });
            }
            incoming.push((
                edge.to.clone(),
                Incoming {
                    from: edge.from.clone(),
                    condition: edge.condition,
                },
            ));
        }

        for (to, inc) in incoming {
            if let Some(source) = nodes.get_mut(&inc.from) {
                source.dependents.insert(to.clone());
            }
            if let Some(target) = nodes.get_mut(&to) {
                target.dependencies.insert(inc.from.clone());
                // A conditional edge subsumes an unconditional one from the same source
                if inc.condition.is_some() {
                    target
                        .incoming
                        .retain(|i| !(i.from == inc.from && i.condition.is_none()));
                } else if target.incoming.iter().any(|i| i.from == inc.from) {
                    continue;
                }
                if !target.incoming.contains(&inc) {
                    target.incoming.push(inc);
                }
            }
        }

        let order = topological_order(&nodes)?;

        let end_nodes = if def.end_nodes.is_empty() {
            order
                .iter()
                .filter(|id| nodes[*id].dependents.is_empty())
                .cloned()
                .collect()
        } else {
            for end in &def.end_nodes {
                if !nodes.contains_key(end) {
                    return Err(ValidationError::UnknownEndMarker(end.clone()));
                }
            }
            def.end_nodes.clone()
        };

        let critical = critical_nodes(&nodes, &order, &end_nodes);
        for (id, node) in nodes.iter_mut() {
            node.critical = node
                .policy
                .critical
                .unwrap_or_else(|| critical.contains(id));
        }

        tracing::debug!(
            workflow = %def.name,
            nodes = order.len(),
            critical = critical.len(),
            "Built dependency graph"
        );

        Ok(Self {
            name: def.name.clone(),
            nodes,
            order,
            end_nodes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Node ids with every dependency before its dependents
    pub fn topological_order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn end_nodes(&self) -> &[NodeId] {
        &self.end_nodes
    }

    pub fn critical_nodes(&self) -> Vec<&NodeId> {
        self.order
            .iter()
            .filter(|id| self.nodes[*id].critical)
            .collect()
    }

    /// Pending nodes whose dependencies have all resolved with at least one
    /// enabled incoming edge. Pure: the same runtime map always yields the
    /// same list, in topological order.
    pub fn ready_nodes(&self, runtimes: &HashMap<NodeId, NodeRuntime>) -> Vec<NodeId> {
        self.order
            .iter()
            .filter(|id| {
                runtimes
                    .get(*id)
                    .is_some_and(|rt| rt.state == NodeState::Pending)
            })
            .filter(|id| self.readiness(id, runtimes) == Readiness::Ready)
            .cloned()
            .collect()
    }

    /// True when every node has reached a final state
    pub fn is_terminal(&self, runtimes: &HashMap<NodeId, NodeRuntime>) -> bool {
        self.order
            .iter()
            .all(|id| runtimes.get(id).is_some_and(NodeRuntime::is_resolved))
    }

    /// Whether a pending node may run given the current runtime states.
    ///
    /// A node with no incoming edges is ready at once. Otherwise it waits for
    /// every dependency to resolve and then runs if at least one incoming
    /// edge is enabled. A permanently failed dependency skips it.
    pub fn readiness(&self, id: &str, runtimes: &HashMap<NodeId, NodeRuntime>) -> Readiness {
        let Some(node) = self.nodes.get(id) else {
            return Readiness::Blocked;
        };
        if node.incoming.is_empty() {
            return Readiness::Ready;
        }

        let mut blocked = false;
        let mut enabled = false;
        for inc in &node.incoming {
            let Some(rt) = runtimes.get(&inc.from) else {
                blocked = true;
                continue;
            };
            match rt.state {
                NodeState::Completed => {
                    let output = rt.result.as_ref().unwrap_or(&Value::Null);
                    if inc.condition.is_none_or(|want| truthy(output) == want) {
                        enabled = true;
                    }
                }
                NodeState::Failed if rt.retry_at.is_none() => {
                    return Readiness::Skip(match rt.error {
                        Some(NodeError::Cancelled) => SkipReason::Cancelled,
                        _ => SkipReason::UpstreamFailed,
                    });
                }
                NodeState::Skipped => match rt.skip_reason {
                    Some(SkipReason::BranchNotTaken) => {}
                    Some(reason) => {
                        return Readiness::Skip(match reason {
                            SkipReason::Aborted => SkipReason::Aborted,
                            SkipReason::Cancelled => SkipReason::Cancelled,
                            _ => SkipReason::UpstreamFailed,
                        });
                    }
                    None => {}
                },
                _ => blocked = true,
            }
        }

        if blocked {
            Readiness::Blocked
        } else if enabled {
            Readiness::Ready
        } else {
            Readiness::Skip(SkipReason::BranchNotTaken)
        }
    }
}

/// Truthiness of a node output when matched against an edge condition
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn validate_policy(id: &str, policy: &NodePolicy) -> Result<(), ValidationError> {
    if let Some(priority) = policy.priority.filter(|p| !(1..=10).contains(p)) {
        return Err(ValidationError::InvalidNode {
            node: id.to_string(),
            reason: format!("priority must be between 1 and 10, got {priority}"),
        });
    }
    if policy.timeout.is_some_and(|t| t.is_zero()) {
        return Err(ValidationError::InvalidNode {
            node: id.to_string(),
            reason: "timeout must be greater than zero".into(),
        });
    }
    Ok(())
}

fn validate_config(
    id: &str,
    config: &NodeConfig,
) -> Result<Vec<Arc<DependencyGraph>>, ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidNode {
        node: id.to_string(),
        reason: reason.to_string(),
    };
    match config {
        NodeConfig::Loop { max_iterations, .. } if *max_iterations == 0 => {
            Err(invalid("loop max_iterations must be at least 1"))
        }
        NodeConfig::Wait { check_interval, .. } if check_interval.is_zero() => {
            Err(invalid("wait check_interval must be greater than zero"))
        }
        NodeConfig::Parallel { sub_workflows } if sub_workflows.is_empty() => {
            Err(invalid("parallel node has no sub-workflows"))
        }
        NodeConfig::Parallel { sub_workflows } => sub_workflows
            .iter()
            .enumerate()
            .map(|(index, sub)| {
                DependencyGraph::build(sub).map(Arc::new).map_err(|e| {
                    ValidationError::SubWorkflow {
                        node: id.to_string(),
                        index,
                        source: Box::new(e),
                    }
                })
            })
            .collect(),
        _ => Ok(Vec::new()),
    }
}

/// Depth-first topological sort over dependencies, reporting the first
/// cycle found as a path.
fn topological_order(nodes: &HashMap<NodeId, GraphNode>) -> Result<Vec<NodeId>, ValidationError> {
    fn visit(
        id: &NodeId,
        nodes: &HashMap<NodeId, GraphNode>,
        visited: &mut HashSet<NodeId>,
        visiting: &mut Vec<NodeId>,
        order: &mut Vec<NodeId>,
    ) -> Result<(), ValidationError> {
        if visited.contains(id) {
            return Ok(());
        }
        if let Some(pos) = visiting.iter().position(|v| v == id) {
            let mut cycle = visiting[pos..].to_vec();
            cycle.push(id.clone());
            return Err(ValidationError::Cycle { cycle });
        }

        visiting.push(id.clone());
        for dep in &nodes[id].dependencies {
            visit(dep, nodes, visited, visiting, order)?;
        }
        visiting.pop();

        visited.insert(id.clone());
        order.push(id.clone());
        Ok(())
    }

    let mut ids: Vec<&NodeId> = nodes.keys().collect();
    ids.sort();

    let mut order = Vec::with_capacity(nodes.len());
    let mut visited = HashSet::new();
    let mut visiting = Vec::new();
    for id in ids {
        visit(id, nodes, &mut visited, &mut visiting, &mut order)?;
    }
    Ok(order)
}

/// Nodes whose removal disconnects every end marker from the roots.
fn critical_nodes(
    nodes: &HashMap<NodeId, GraphNode>,
    order: &[NodeId],
    end_nodes: &[NodeId],
) -> HashSet<NodeId> {
    let roots: Vec<&NodeId> = order
        .iter()
        .filter(|id| nodes[*id].dependencies.is_empty())
        .collect();
    let ends: HashSet<&NodeId> = end_nodes.iter().collect();

    let reaches_end_without = |removed: &NodeId| -> bool {
        let mut seen: HashSet<&NodeId> = HashSet::new();
        let mut queue: VecDeque<&NodeId> = roots
            .iter()
            .copied()
            .filter(|r| *r != removed)
            .collect();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if ends.contains(id) {
                return true;
            }
            for next in &nodes[id].dependents {
                if next != removed && !seen.contains(next) {
                    queue.push_back(next);
                }
            }
        }
        false
    };

    order
        .iter()
        .filter(|id| !reaches_end_without(id))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::definition::NodeSpec;
    use rand::Rng;
    use std::time::Duration;

    fn noop(id: &str) -> NodeSpec {
        NodeSpec::task(id, |_| async { Ok(Value::Null) })
    }

    fn chain() -> WorkflowDefinition {
        WorkflowDefinition::new("chain")
            .node(noop("a"))
            .node(noop("b").depends_on(["a"]))
            .node(noop("c").depends_on(["b"]))
    }

    fn diamond() -> WorkflowDefinition {
        WorkflowDefinition::new("diamond")
            .node(noop("a"))
            .node(noop("b"))
            .node(noop("c"))
            .node(noop("d"))
            .connect("a", "b")
            .connect("a", "c")
            .connect("b", "d")
            .connect("c", "d")
    }

    fn completed(output: Value) -> NodeRuntime {
        NodeRuntime {
            state: NodeState::Completed,
            result: Some(output),
            ..Default::default()
        }
    }

    fn pending(graph: &DependencyGraph) -> HashMap<NodeId, NodeRuntime> {
        graph
            .topological_order()
            .iter()
            .map(|id| (id.clone(), NodeRuntime::default()))
            .collect()
    }

    #[test]
    fn test_topological_order_chain() {
        let graph = DependencyGraph::build(&chain()).unwrap();
        assert_eq!(graph.topological_order(), &["a", "b", "c"]);
        assert_eq!(graph.end_nodes(), &["c"]);
    }

    #[test]
    fn test_cycle_detected_with_path() {
        let def = WorkflowDefinition::new("cyclic")
            .node(noop("a").depends_on(["c"]))
            .node(noop("b").depends_on(["a"]))
            .node(noop("c").depends_on(["b"]));

        match DependencyGraph::build(&def) {
            Err(ValidationError::Cycle { cycle }) => {
                assert_eq!(cycle.first(), cycle.last());
                assert_eq!(cycle.len(), 4);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_loop_is_cycle() {
        let def = WorkflowDefinition::new("self").node(noop("a")).connect("a", "a");
        assert!(matches!(
            DependencyGraph::build(&def),
            Err(ValidationError::Cycle { .. })
        ));
    }

    #[test]
    fn test_random_dags_build_and_back_edges_fail() {
        let mut rng = rand::rng();
        for _ in 0..50 {
            let n = rng.random_range(2..12);
            let mut def = WorkflowDefinition::new("random");
            for i in 0..n {
                def = def.node(noop(&format!("n{i}")));
            }
            for to in 1..n {
                for from in 0..to {
                    if rng.random_bool(0.3) {
                        def = def.connect(format!("n{from}"), format!("n{to}"));
                    }
                }
            }
            // Forward edges only: acyclic
            let graph = DependencyGraph::build(&def).unwrap();
            let pos: HashMap<&str, usize> = graph
                .topological_order()
                .iter()
                .enumerate()
                .map(|(i, id)| (id.as_str(), i))
                .collect();
            for edge in &def.connections {
                assert!(pos[edge.from.as_str()] < pos[edge.to.as_str()]);
            }

            // Close a path into a cycle
            let def = def
                .connect("n0", "n1")
                .connect(format!("n{}", n - 1), "n0")
                .connect("n1", format!("n{}", n - 1));
            assert!(matches!(
                DependencyGraph::build(&def),
                Err(ValidationError::Cycle { .. })
            ));
        }
    }

    #[test]
    fn test_unknown_dependency() {
        let def = WorkflowDefinition::new("bad").node(noop("a").depends_on(["ghost"]));
        assert_eq!(
            DependencyGraph::build(&def).unwrap_err(),
            ValidationError::UnknownDependency {
                node: "a".into(),
                dependency: "ghost".into()
            }
        );
    }

    #[test]
    fn test_invalid_edge() {
        let def = WorkflowDefinition::new("bad").node(noop("a")).connect("a", "zzz");
        assert!(matches!(
            DependencyGraph::build(&def),
            Err(ValidationError::InvalidEdge { .. })
        ));
    }

    #[test]
    fn test_id_mismatch() {
        let mut def = WorkflowDefinition::new("bad");
        def.nodes.insert("x".into(), noop("y"));
        assert!(matches!(
            DependencyGraph::build(&def),
            Err(ValidationError::IdMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_node_configs() {
        let def = WorkflowDefinition::new("bad").node(noop("a").with_priority(11));
        assert!(matches!(
            DependencyGraph::build(&def),
            Err(ValidationError::InvalidNode { .. })
        ));

        let def = WorkflowDefinition::new("bad").node(NodeSpec::looping(
            "l",
            0,
            |_, _, _| async { Ok(crate::workflow::LoopStep::Break(Value::Null)) },
        ));
        assert!(matches!(
            DependencyGraph::build(&def),
            Err(ValidationError::InvalidNode { .. })
        ));

        let def = WorkflowDefinition::new("bad").node(NodeSpec::parallel("p", vec![]));
        assert!(matches!(
            DependencyGraph::build(&def),
            Err(ValidationError::InvalidNode { .. })
        ));

        let def = WorkflowDefinition::new("bad").node(NodeSpec::wait(
            "w",
            Duration::from_secs(1),
            Duration::ZERO,
            |_| async { Ok(true) },
        ));
        assert!(matches!(
            DependencyGraph::build(&def),
            Err(ValidationError::InvalidNode { .. })
        ));
    }

    #[test]
    fn test_invalid_sub_workflow_is_reported() {
        let cyclic = WorkflowDefinition::new("sub")
            .node(noop("x").depends_on(["y"]))
            .node(noop("y").depends_on(["x"]));
        let def = WorkflowDefinition::new("outer")
            .node(NodeSpec::parallel("p", vec![chain(), cyclic]));

        match DependencyGraph::build(&def) {
            Err(ValidationError::SubWorkflow { node, index, source }) => {
                assert_eq!(node, "p");
                assert_eq!(index, 1);
                assert!(matches!(*source, ValidationError::Cycle { .. }));
            }
            other => panic!("expected sub-workflow error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_end_marker() {
        let def = chain().end("nope");
        assert_eq!(
            DependencyGraph::build(&def).unwrap_err(),
            ValidationError::UnknownEndMarker("nope".into())
        );
    }

    #[test]
    fn test_ready_nodes_idempotent() {
        let graph = DependencyGraph::build(&diamond()).unwrap();
        let mut runtimes = pending(&graph);

        assert_eq!(graph.ready_nodes(&runtimes), vec!["a"]);
        assert_eq!(graph.ready_nodes(&runtimes), graph.ready_nodes(&runtimes));

        runtimes.insert("a".into(), completed(Value::Null));
        let first = graph.ready_nodes(&runtimes);
        assert_eq!(first, vec!["b", "c"]);
        assert_eq!(graph.ready_nodes(&runtimes), first);

        runtimes.insert("b".into(), completed(Value::Null));
        assert_eq!(graph.ready_nodes(&runtimes), vec!["c"]);
        runtimes.insert("c".into(), completed(Value::Null));
        assert_eq!(graph.ready_nodes(&runtimes), vec!["d"]);
        runtimes.insert("d".into(), completed(Value::Null));
        assert!(graph.ready_nodes(&runtimes).is_empty());
    }

    #[test]
    fn test_ready_nodes_only_pending() {
        let graph = DependencyGraph::build(&diamond()).unwrap();
        let mut runtimes = pending(&graph);
        runtimes.insert("a".into(), completed(Value::Null));
        runtimes.get_mut("b").unwrap().state = NodeState::Running;
        runtimes.get_mut("c").unwrap().state = NodeState::Failed;
        assert!(graph.ready_nodes(&runtimes).is_empty());

        runtimes.get_mut("b").unwrap().state = NodeState::Ready;
        runtimes.get_mut("c").unwrap().skip(SkipReason::Aborted);
        assert!(graph.ready_nodes(&runtimes).is_empty());

        // Nodes missing from the map never count as pending
        assert!(graph.ready_nodes(&HashMap::new()).is_empty());
    }

    #[test]
    fn test_readiness_waits_for_all_dependencies() {
        let graph = DependencyGraph::build(&diamond()).unwrap();
        let mut runtimes: HashMap<NodeId, NodeRuntime> = graph
            .topological_order()
            .iter()
            .map(|id| (id.clone(), NodeRuntime::default()))
            .collect();

        runtimes.insert("a".into(), completed(Value::Null));
        runtimes.insert("b".into(), completed(Value::Null));
        assert_eq!(graph.readiness("d", &runtimes), Readiness::Blocked);

        runtimes.insert("c".into(), completed(Value::Null));
        assert_eq!(graph.readiness("d", &runtimes), Readiness::Ready);
    }

    #[test]
    fn test_readiness_conditional_branches() {
        let def = WorkflowDefinition::new("branch")
            .node(NodeSpec::condition("check", |_| async { Ok(true) }))
            .node(noop("yes"))
            .node(noop("no"))
            .node(noop("join"))
            .connect_when("check", "yes", true)
            .connect_when("check", "no", false)
            .connect("yes", "join")
            .connect("no", "join");
        let graph = DependencyGraph::build(&def).unwrap();

        let mut runtimes = HashMap::new();
        runtimes.insert("check".to_string(), completed(Value::Bool(true)));
        assert_eq!(graph.readiness("yes", &runtimes), Readiness::Ready);
        assert_eq!(
            graph.readiness("no", &runtimes),
            Readiness::Skip(SkipReason::BranchNotTaken)
        );

        let mut skipped = NodeRuntime::default();
        skipped.skip(SkipReason::BranchNotTaken);
        runtimes.insert("no".into(), skipped);
        runtimes.insert("yes".into(), completed(Value::Null));
        // One enabled edge is enough for the join
        assert_eq!(graph.readiness("join", &runtimes), Readiness::Ready);
    }

    #[test]
    fn test_readiness_upstream_failure() {
        let graph = DependencyGraph::build(&chain()).unwrap();
        let mut runtimes = HashMap::new();
        runtimes.insert(
            "a".to_string(),
            NodeRuntime {
                state: NodeState::Failed,
                ..Default::default()
            },
        );
        assert_eq!(
            graph.readiness("b", &runtimes),
            Readiness::Skip(SkipReason::UpstreamFailed)
        );

        // Pending retry is not a final failure
        runtimes.get_mut("a").unwrap().retry_at = Some(tokio::time::Instant::now());
        assert_eq!(graph.readiness("b", &runtimes), Readiness::Blocked);

        // A cancelled dependency is not an upstream failure
        runtimes.insert(
            "a".to_string(),
            NodeRuntime {
                state: NodeState::Failed,
                error: Some(NodeError::Cancelled),
                ..Default::default()
            },
        );
        assert_eq!(
            graph.readiness("b", &runtimes),
            Readiness::Skip(SkipReason::Cancelled)
        );

        let mut skipped = NodeRuntime::default();
        skipped.skip(SkipReason::UpstreamFailed);
        runtimes.insert("b".into(), skipped);
        assert_eq!(
            graph.readiness("c", &runtimes),
            Readiness::Skip(SkipReason::UpstreamFailed)
        );
    }

    #[test]
    fn test_critical_chain_and_alternate_path() {
        let graph = DependencyGraph::build(&chain()).unwrap();
        assert_eq!(graph.critical_nodes().len(), 3);

        // start -> flaky -> report, start -> safe -> report
        let def = WorkflowDefinition::new("alt")
            .node(noop("start"))
            .node(noop("flaky").depends_on(["start"]))
            .node(noop("safe").depends_on(["start"]))
            .node(noop("report"))
            .connect("flaky", "report")
            .connect("safe", "report");
        let graph = DependencyGraph::build(&def).unwrap();
        let critical: Vec<&str> = graph.critical_nodes().iter().map(|s| s.as_str()).collect();
        assert_eq!(critical, vec!["start", "report"]);
        assert!(!graph.node("flaky").unwrap().critical);
    }

    #[test]
    fn test_explicit_critical_flag_wins() {
        let def = WorkflowDefinition::new("flags")
            .node(noop("a").critical(false))
            .node(noop("b").depends_on(["a"]))
            .node(noop("side").critical(true));
        let graph = DependencyGraph::build(&def).unwrap();
        assert!(!graph.node("a").unwrap().critical);
        assert!(graph.node("side").unwrap().critical);
    }

    #[test]
    fn test_end_marker_makes_branch_best_effort() {
        let def = chain().node(noop("audit").depends_on(["a"])).end("c");
        let graph = DependencyGraph::build(&def).unwrap();
        assert!(!graph.node("audit").unwrap().critical);
        assert!(graph.node("b").unwrap().critical);
    }

    #[test]
    fn test_is_terminal() {
        let graph = DependencyGraph::build(&chain()).unwrap();
        let mut runtimes: HashMap<NodeId, NodeRuntime> = HashMap::new();
        runtimes.insert("a".into(), completed(Value::Null));
        runtimes.insert("b".into(), NodeRuntime::default());
        runtimes.insert("c".into(), NodeRuntime::default());
        assert!(!graph.is_terminal(&runtimes));

        runtimes.get_mut("b").unwrap().skip(SkipReason::UpstreamFailed);
        runtimes.get_mut("c").unwrap().skip(SkipReason::UpstreamFailed);
        assert!(graph.is_terminal(&runtimes));
    }

    #[test]
    fn test_empty_workflow_builds() {
        let graph = DependencyGraph::build(&WorkflowDefinition::new("empty")).unwrap();
        assert!(graph.is_empty());
        assert!(graph.is_terminal(&HashMap::new()));
    }

    #[test]
    fn test_truthy() {
        assert!(truthy(&Value::Bool(true)));
        assert!(!truthy(&Value::Null));
        assert!(!truthy(&serde_json::json!(0)));
        assert!(truthy(&serde_json::json!("yes")));
        assert!(!truthy(&serde_json::json!("false")));
        assert!(!truthy(&serde_json::json!([])));
    }
}
