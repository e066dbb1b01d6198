//! Per-run node state and the reports built from it

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use super::definition::NodeId;
use super::error::{NodeError, RunError};
use super::node::NodeType;

/// Lifecycle state of one node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeState::Completed | NodeState::Failed | NodeState::Skipped
        )
    }
}

/// Why a node never ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No incoming connection was enabled
    BranchNotTaken,
    /// A dependency failed, or was skipped because one upstream of it did
    UpstreamFailed,
    /// The run stopped after a critical-path failure
    Aborted,
    /// The run was cancelled
    Cancelled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::BranchNotTaken => "branch not taken",
            SkipReason::UpstreamFailed => "upstream failed",
            SkipReason::Aborted => "aborted",
            SkipReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable state of one node. Written only by the run's coordinating loop.
#[derive(Debug, Clone)]
pub struct NodeRuntime {
    pub state: NodeState,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<NodeError>,
    pub skip_reason: Option<SkipReason>,
    /// When a failed node re-enters `pending`
    pub retry_at: Option<Instant>,
    /// Order in which the node last became ready; breaks scheduling ties
    pub ready_seq: u64,
    pub duration: Option<Duration>,
}

impl Default for NodeRuntime {
    fn default() -> Self {
        Self {
            state: NodeState::Pending,
            attempts: 0,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            skip_reason: None,
            retry_at: None,
            ready_seq: 0,
            duration: None,
        }
    }
}

impl NodeRuntime {
    pub fn skip(&mut self, reason: SkipReason) {
        self.state = NodeState::Skipped;
        self.skip_reason = Some(reason);
        self.retry_at = None;
    }

    /// Failed for good: no retry pending
    pub fn is_final_failure(&self) -> bool {
        self.state == NodeState::Failed && self.retry_at.is_none()
    }

    pub fn is_resolved(&self) -> bool {
        match self.state {
            NodeState::Failed => self.retry_at.is_none(),
            state => state.is_terminal(),
        }
    }
}

/// Overall state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    /// Finished. Best-effort nodes may have failed; see [`RunReport::is_partial`]
    Completed,
    /// Aborted by a critical-path failure
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub total: usize,
    pub pending: usize,
    pub ready: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Attempts started across all nodes
    pub attempts: u32,
}

impl RunStats {
    pub fn from_nodes<'a>(nodes: impl IntoIterator<Item = &'a NodeStatus>) -> Self {
        let mut stats = RunStats::default();
        for node in nodes {
            stats.total += 1;
            stats.attempts += node.attempts;
            match node.state {
                NodeState::Pending => stats.pending += 1,
                NodeState::Ready => stats.ready += 1,
                NodeState::Running => stats.running += 1,
                NodeState::Completed => stats.completed += 1,
                NodeState::Failed => stats.failed += 1,
                NodeState::Skipped => stats.skipped += 1,
            }
        }
        stats
    }
}

/// Externally visible status of one node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub state: NodeState,
    pub attempts: u32,
    pub critical: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

/// Snapshot published while a run progresses.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub run_id: String,
    pub workflow: String,
    pub state: RunState,
    pub nodes: Vec<NodeStatus>,
    pub stats: RunStats,
}

impl RunStatus {
    pub fn node(&self, id: &str) -> Option<&NodeStatus> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Final outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub workflow: String,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Nodes in topological order
    pub nodes: Vec<NodeStatus>,
    pub stats: RunStats,
    /// Run context at the end of the run, including every node output
    pub context: serde_json::Map<String, Value>,
    #[serde(skip)]
    pub error: Option<RunError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed && self.stats.failed == 0
    }

    /// Completed, but some best-effort node failed
    pub fn is_partial(&self) -> bool {
        self.state == RunState::Completed && self.stats.failed > 0
    }

    pub fn node(&self, id: &str) -> Option<&NodeStatus> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn output(&self, id: &str) -> Option<&Value> {
        self.context.get(id)
    }

    /// Failed nodes with their last error
    pub fn failures(&self) -> BTreeMap<&str, &NodeError> {
        self.nodes
            .iter()
            .filter(|n| n.state == NodeState::Failed)
            .filter_map(|n| n.error.as_ref().map(|e| (n.id.as_str(), e)))
            .collect()
    }
}

/// Whole milliseconds of `d`, saturating at `u64::MAX`
pub fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(id: &str, state: NodeState, attempts: u32) -> NodeStatus {
        NodeStatus {
            id: id.into(),
            node_type: NodeType::Task,
            state,
            attempts,
            critical: false,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            error: (state == NodeState::Failed).then(|| NodeError::execution("boom")),
            skip_reason: None,
            output: None,
        }
    }

    #[test]
    fn test_stats_from_nodes() {
        let nodes = vec![
            status("a", NodeState::Completed, 1),
            status("b", NodeState::Failed, 3),
            status("c", NodeState::Skipped, 0),
            status("d", NodeState::Running, 1),
        ];
        let stats = RunStats::from_nodes(&nodes);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.attempts, 5);
    }

    #[test]
    fn test_runtime_resolution() {
        let mut rt = NodeRuntime::default();
        assert!(!rt.is_resolved());

        rt.state = NodeState::Failed;
        rt.retry_at = Some(Instant::now());
        assert!(!rt.is_resolved());
        assert!(!rt.is_final_failure());

        rt.retry_at = None;
        assert!(rt.is_resolved());
        assert!(rt.is_final_failure());

        rt.skip(SkipReason::Cancelled);
        assert_eq!(rt.state, NodeState::Skipped);
        assert!(rt.is_resolved());
    }

    #[test]
    fn test_report_partial() {
        let nodes = vec![
            status("a", NodeState::Completed, 1),
            status("b", NodeState::Failed, 3),
        ];
        let now = Utc::now();
        let report = RunReport {
            run_id: "r".into(),
            workflow: "w".into(),
            state: RunState::Completed,
            started_at: now,
            completed_at: now,
            duration_ms: 0,
            stats: RunStats::from_nodes(&nodes),
            nodes,
            context: Default::default(),
            error: None,
        };
        assert!(report.is_partial());
        assert!(!report.is_success());
        assert_eq!(report.failures().len(), 1);
        assert!(report.failures().contains_key("b"));
    }

    #[test]
    fn test_node_status_serialization() {
        let json = serde_json::to_value(status("b", NodeState::Failed, 2)).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["type"], "task");
        assert_eq!(json["error"]["kind"], "execution");
        assert!(json.get("output").is_none());
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
