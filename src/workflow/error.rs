//! Error taxonomy for graph construction, node execution and whole runs

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use super::definition::NodeId;

/// Problems found while building a graph. A run never starts when one of
/// these is returned.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("circular dependency detected: {}", .cycle.join(" -> "))]
    Cycle { cycle: Vec<NodeId> },

    #[error("node '{node}' depends on unknown node '{dependency}'")]
    UnknownDependency { node: NodeId, dependency: NodeId },

    #[error("connection references unknown node: from={from}, to={to}")]
    InvalidEdge { from: NodeId, to: NodeId },

    #[error("node stored under key '{key}' declares id '{id}'")]
    IdMismatch { key: String, id: NodeId },

    #[error("node '{node}' is invalid: {reason}")]
    InvalidNode { node: NodeId, reason: String },

    #[error("end marker '{0}' is not a node of the workflow")]
    UnknownEndMarker(NodeId),

    #[error(
        "node '{node}' requires {kind}={required} but the pool only holds {capacity}"
    )]
    ExceedsCapacity {
        node: NodeId,
        kind: &'static str,
        required: u64,
        capacity: u64,
    },

    #[error("sub-workflow {index} of node '{node}' is invalid: {source}")]
    SubWorkflow {
        node: NodeId,
        index: usize,
        #[source]
        source: Box<ValidationError>,
    },
}

/// Failure of a single node attempt.
#[derive(Debug, Clone, Error, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeError {
    /// The node body returned an error or panicked
    #[error("{message}")]
    Execution { message: String },

    /// The node exceeded its configured timeout
    #[error("timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// A wait node's condition never held within its window
    #[error("wait condition not met within {max_wait:?}")]
    WaitTimeout { max_wait: Duration },

    /// A loop node ran past its iteration cap
    #[error("loop exceeded {max_iterations} iterations")]
    LoopLimitExceeded { max_iterations: u32 },

    /// One or more sub-workflows of a parallel node did not complete
    #[error("{} of {total} sub-workflows failed: {}", .errors.len(), .errors.join("; "))]
    SubWorkflow { total: usize, errors: Vec<String> },

    /// The run was cancelled before the node finished
    #[error("cancelled")]
    Cancelled,

    /// A command or expression template could not be rendered
    #[error("template error: {message}")]
    Template { message: String },
}

impl NodeError {
    /// Create an execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    /// Check if another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NodeError::Execution { .. }
                | NodeError::Timeout { .. }
                | NodeError::WaitTimeout { .. }
                | NodeError::SubWorkflow { .. }
                | NodeError::Template { .. }
        )
    }

    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            NodeError::Execution { .. } => "execution",
            NodeError::Timeout { .. } => "timeout",
            NodeError::WaitTimeout { .. } => "wait_timeout",
            NodeError::LoopLimitExceeded { .. } => "loop_limit_exceeded",
            NodeError::SubWorkflow { .. } => "sub_workflow",
            NodeError::Cancelled => "cancelled",
            NodeError::Template { .. } => "template",
        }
    }

    /// Timeouts of either flavour
    pub fn is_timeout(&self) -> bool {
        matches!(self, NodeError::Timeout { .. } | NodeError::WaitTimeout { .. })
    }
}

impl From<crate::template::TemplateError> for NodeError {
    fn from(err: crate::template::TemplateError) -> Self {
        NodeError::Template {
            message: err.to_string(),
        }
    }
}

/// Why a run ended without completing.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RunError {
    #[error("critical node '{node}' failed: {source}")]
    CriticalPathAbort {
        node: NodeId,
        #[source]
        source: NodeError,
    },

    #[error("run cancelled")]
    Cancelled,
}

/// Errors surfaced by the submission service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("unknown run '{0}'")]
    UnknownRun(String),

    #[error("report for run '{0}' was already collected")]
    AlreadyCollected(String),

    #[error("run '{run_id}' task failed: {message}")]
    Join { run_id: String, message: String },
}
