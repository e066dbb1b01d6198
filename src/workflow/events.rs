//! Lifecycle events and the observability collaborators that consume them

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::definition::NodeId;
use super::state::millis;

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    #[serde(rename = "workflow:started")]
    WorkflowStarted,
    #[serde(rename = "workflow:completed")]
    WorkflowCompleted,
    #[serde(rename = "workflow:failed")]
    WorkflowFailed,
    #[serde(rename = "workflow:cancelled")]
    WorkflowCancelled,
    #[serde(rename = "node:started")]
    NodeStarted,
    #[serde(rename = "node:completed")]
    NodeCompleted,
    #[serde(rename = "node:failed")]
    NodeFailed,
    #[serde(rename = "node:retry_scheduled")]
    NodeRetryScheduled,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::WorkflowStarted => "workflow:started",
            EventKind::WorkflowCompleted => "workflow:completed",
            EventKind::WorkflowFailed => "workflow:failed",
            EventKind::WorkflowCancelled => "workflow:cancelled",
            EventKind::NodeStarted => "node:started",
            EventKind::NodeCompleted => "node:completed",
            EventKind::NodeFailed => "node:failed",
            EventKind::NodeRetryScheduled => "node:retry_scheduled",
        }
    }

    pub fn is_workflow_event(&self) -> bool {
        matches!(
            self,
            EventKind::WorkflowStarted
                | EventKind::WorkflowCompleted
                | EventKind::WorkflowFailed
                | EventKind::WorkflowCancelled
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleEvent {
    #[serde(rename = "event")]
    pub kind: EventKind,
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    /// Delay before the next attempt, for retry events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_in_ms: Option<u64>,
}

impl LifecycleEvent {
    pub fn workflow(kind: EventKind, run_id: &str) -> Self {
        Self {
            kind,
            run_id: run_id.to_string(),
            node_id: None,
            timestamp: Utc::now(),
            duration_ms: None,
            error: None,
            attempt: None,
            retry_in_ms: None,
        }
    }

    pub fn node(kind: EventKind, run_id: &str, node_id: &str, attempt: u32) -> Self {
        Self {
            node_id: Some(node_id.to_string()),
            attempt: Some(attempt),
            ..Self::workflow(kind, run_id)
        }
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration_ms = Some(millis(duration));
        self
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn with_retry_in(mut self, delay: std::time::Duration) -> Self {
        self.retry_in_ms = Some(millis(delay));
        self
    }
}

/// Consumer of lifecycle events. Emission is fire-and-forget: sinks must not
/// block and cannot influence scheduling.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &LifecycleEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &LifecycleEvent) {}
}

/// Structured-logger sink: each event becomes a `tracing` event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &LifecycleEvent) {
        let node = event.node_id.as_deref().unwrap_or("-");
        match event.kind {
            EventKind::NodeFailed | EventKind::WorkflowFailed => tracing::warn!(
                event = event.kind.as_str(),
                run_id = %event.run_id,
                node_id = node,
                attempt = event.attempt,
                duration_ms = event.duration_ms,
                error = event.error.as_deref(),
                "Lifecycle event"
            ),
            EventKind::NodeRetryScheduled => tracing::info!(
                event = event.kind.as_str(),
                run_id = %event.run_id,
                node_id = node,
                attempt = event.attempt,
                retry_in_ms = event.retry_in_ms,
                error = event.error.as_deref(),
                "Lifecycle event"
            ),
            _ => tracing::debug!(
                event = event.kind.as_str(),
                run_id = %event.run_id,
                node_id = node,
                attempt = event.attempt,
                duration_ms = event.duration_ms,
                "Lifecycle event"
            ),
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }

    /// Events for one node, in emission order
    pub fn for_node(&self, node: &str) -> Vec<LifecycleEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.node_id.as_deref() == Some(node))
            .collect()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &LifecycleEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Forwards events over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &LifecycleEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(event.clone());
    }
}

/// Sends each event to several sinks
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &LifecycleEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

/// How a node attempt ended, as reported to its span.
#[derive(Debug, Clone, PartialEq)]
pub enum SpanOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

/// Span around one node attempt.
pub trait NodeSpan: Send {
    /// A `tracing` span to run the node body inside, if the factory has one
    fn tracing_span(&self) -> Option<tracing::Span> {
        None
    }

    fn finish(self: Box<Self>, outcome: SpanOutcome);
}

/// Optional distributed-tracing hook. Creates one span per node attempt and
/// never affects scheduling.
pub trait SpanFactory: Send + Sync {
    fn start(&self, run_id: &str, node_id: &str, attempt: u32) -> Box<dyn NodeSpan>;
}

/// Span factory backed by `tracing` spans
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSpans;

struct TracingNodeSpan {
    span: tracing::Span,
}

impl NodeSpan for TracingNodeSpan {
    fn tracing_span(&self) -> Option<tracing::Span> {
        Some(self.span.clone())
    }

    fn finish(self: Box<Self>, outcome: SpanOutcome) {
        let _guard = self.span.enter();
        match outcome {
            SpanOutcome::Completed => tracing::trace!("span finished"),
            SpanOutcome::Failed(error) => tracing::trace!(%error, "span failed"),
            SpanOutcome::Cancelled => tracing::trace!("span cancelled"),
        }
    }
}

impl SpanFactory for TracingSpans {
    fn start(&self, run_id: &str, node_id: &str, attempt: u32) -> Box<dyn NodeSpan> {
        Box::new(TracingNodeSpan {
            span: tracing::info_span!("node", run_id = %run_id, node_id = %node_id, attempt),
        })
    }
}
