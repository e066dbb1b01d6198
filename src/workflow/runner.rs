//! Execution engine: the per-run coordinating loop that admits ready nodes,
//! awaits completions and applies retry, abort and cancellation policy

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::Instrument;

use super::admission::TokenBucket;
use super::cancel::CancellationToken;
use super::definition::{NodeId, WorkflowDefinition};
use super::error::{NodeError, RunError, ValidationError};
use super::events::{EventKind, EventSink, LifecycleEvent, NodeSpan, SpanFactory, SpanOutcome, TracingSink};
use super::graph::{DependencyGraph, Readiness};
use super::node::{NodeConfig, NodeContext};
use super::resources::{ResourcePool, Resources};
use super::scheduler::{Candidate, Scheduler, SchedulingPolicy};
use super::state::{
    NodeRuntime, NodeState, NodeStatus, RunReport, RunState, RunStats, RunStatus, SkipReason,
    millis,
};
use crate::history::{ExecutionHistory, Sample, history_key};

/// Default cap on concurrently running nodes
pub const DEFAULT_MAX_PARALLEL_TASKS: usize = 4;

/// Default time in-flight nodes get to observe cancellation
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Longest wait before a failed node is retried
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-run execution options.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub max_parallel_tasks: usize,
    pub policy: SchedulingPolicy,
    /// Pool capacities; derived from `max_parallel_tasks` when absent
    pub capacity: Option<Resources>,
    pub grace_period: Duration,
    /// Admission rate in nodes per second
    pub dispatch_rate: Option<f64>,
    pub dispatch_burst: u32,
    /// Add up to 25% random jitter to retry backoff
    pub retry_jitter: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_parallel_tasks: DEFAULT_MAX_PARALLEL_TASKS,
            policy: SchedulingPolicy::default(),
            capacity: None,
            grace_period: DEFAULT_GRACE_PERIOD,
            dispatch_rate: None,
            dispatch_burst: 1,
            retry_jitter: false,
        }
    }
}

impl RunOptions {
    pub fn capacity(&self) -> Resources {
        self.capacity
            .unwrap_or_else(|| Resources::for_parallelism(self.max_parallel_tasks))
    }

    fn max_parallel(&self) -> usize {
        self.max_parallel_tasks.max(1)
    }
}

/// Generate a run id
pub fn new_run_id() -> String {
    format!(
        "run-{}-{:08x}",
        Utc::now().format("%Y%m%d%H%M%S"),
        rand::random::<u32>()
    )
}

/// Executes workflow graphs. Cheap to clone; clones share history, sink and
/// span factory.
#[derive(Clone)]
pub struct Engine {
    options: RunOptions,
    history: Arc<ExecutionHistory>,
    sink: Arc<dyn EventSink>,
    spans: Option<Arc<dyn SpanFactory>>,
}

impl Engine {
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            history: Arc::new(ExecutionHistory::new()),
            sink: Arc::new(TracingSink),
            spans: None,
        }
    }

    /// Same history, sink and spans with different run options
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_history(mut self, history: Arc<ExecutionHistory>) -> Self {
        self.history = history;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_spans(mut self, spans: Arc<dyn SpanFactory>) -> Self {
        self.spans = Some(spans);
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn history(&self) -> &Arc<ExecutionHistory> {
        &self.history
    }

    /// Build and validate a definition for this engine's options
    pub fn prepare(&self, def: &WorkflowDefinition) -> Result<Arc<DependencyGraph>, ValidationError> {
        check_capacity(def, &self.options.capacity())?;
        DependencyGraph::build(def).map(Arc::new)
    }

    /// Validate and run a definition to completion
    pub async fn run(
        &self,
        def: &WorkflowDefinition,
        initial: serde_json::Map<String, Value>,
        cancel: CancellationToken,
    ) -> Result<RunReport, ValidationError> {
        let graph = self.prepare(def)?;
        Ok(self.execute(new_run_id(), graph, initial, cancel, None).await)
    }

    /// Run a prepared graph. Every node's final state is in the report;
    /// node failures never surface as an `Err`.
    pub async fn execute(
        &self,
        run_id: String,
        graph: Arc<DependencyGraph>,
        initial: serde_json::Map<String, Value>,
        cancel: CancellationToken,
        status: Option<watch::Sender<RunStatus>>,
    ) -> RunReport {
        RunLoop::new(self, run_id, graph, initial, cancel, status)
            .drive()
            .await
    }
}

fn check_capacity(def: &WorkflowDefinition, capacity: &Resources) -> Result<(), ValidationError> {
    for spec in def.nodes.values() {
        if let Some((kind, required, cap)) = spec.policy.resources.first_excess(capacity) {
            return Err(ValidationError::ExceedsCapacity {
                node: spec.id.clone(),
                kind,
                required,
                capacity: cap,
            });
        }
        if let NodeConfig::Parallel { sub_workflows } = &spec.config {
            for (index, sub) in sub_workflows.iter().enumerate() {
                check_capacity(sub, capacity).map_err(|e| ValidationError::SubWorkflow {
                    node: spec.id.clone(),
                    index,
                    source: Box::new(e),
                })?;
            }
        }
    }
    Ok(())
}

/// `delay` from now, saturating at [`MAX_RETRY_DELAY`] past the clock's range
pub(super) fn instant_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .or_else(|| now.checked_add(MAX_RETRY_DELAY))
        .unwrap_or(now)
}

/// Why admission stopped before the graph was exhausted.
#[derive(Debug, Clone)]
enum Stop {
    Abort { node: NodeId, error: NodeError },
    Cancelled,
}

/// Outcome of one spawned node attempt.
struct Attempt {
    node_id: NodeId,
    result: Result<Value, NodeError>,
    elapsed: Duration,
}

/// What woke the coordinating loop.
enum Wake {
    Joined(Result<(tokio::task::Id, Attempt), JoinError>),
    Cancelled,
    GraceExpired,
    Timer,
}

struct RunLoop<'a> {
    engine: &'a Engine,
    run_id: String,
    graph: Arc<DependencyGraph>,
    runtimes: HashMap<NodeId, NodeRuntime>,
    context: serde_json::Map<String, Value>,
    outputs: serde_json::Map<String, Value>,
    pool: ResourcePool,
    bucket: Option<TokenBucket>,
    scheduler: Scheduler,
    cancel: CancellationToken,
    in_flight: JoinSet<Attempt>,
    task_nodes: HashMap<tokio::task::Id, NodeId>,
    spans: HashMap<NodeId, Box<dyn NodeSpan>>,
    ready_seq: u64,
    stop: Option<Stop>,
    cancel_seen: bool,
    grace_deadline: Option<Instant>,
    started_at: DateTime<Utc>,
    started: Instant,
    status: Option<watch::Sender<RunStatus>>,
}

impl<'a> RunLoop<'a> {
    fn new(
        engine: &'a Engine,
        run_id: String,
        graph: Arc<DependencyGraph>,
        initial: serde_json::Map<String, Value>,
        cancel: CancellationToken,
        status: Option<watch::Sender<RunStatus>>,
    ) -> Self {
        let options = &engine.options;
        let runtimes = graph
            .topological_order()
            .iter()
            .map(|id| (id.clone(), NodeRuntime::default()))
            .collect();

        Self {
            engine,
            run_id,
            runtimes,
            context: initial,
            outputs: serde_json::Map::new(),
            pool: ResourcePool::new(options.capacity()),
            bucket: options
                .dispatch_rate
                .map(|rate| TokenBucket::new(rate, options.dispatch_burst)),
            scheduler: Scheduler::new(options.policy),
            cancel,
            in_flight: JoinSet::new(),
            task_nodes: HashMap::new(),
            spans: HashMap::new(),
            ready_seq: 0,
            stop: None,
            cancel_seen: false,
            grace_deadline: None,
            started_at: Utc::now(),
            started: Instant::now(),
            status,
            graph,
        }
    }

    async fn drive(mut self) -> RunReport {
        tracing::info!(
            run_id = %self.run_id,
            workflow = %self.graph.name(),
            nodes = self.graph.len(),
            policy = %self.scheduler.policy(),
            "Starting workflow run"
        );
        self.emit(LifecycleEvent::workflow(EventKind::WorkflowStarted, &self.run_id));

        loop {
            if !self.cancel_seen && self.cancel.is_cancelled() {
                self.begin_cancel();
            }
            if self.stop.is_none() {
                self.promote_due_retries();
            }
            self.resolve_pending();
            let bucket_wake = if self.stop.is_none() { self.admit() } else { None };
            self.publish(RunState::Running);

            if self.in_flight.is_empty() {
                if self.stop.is_some() {
                    break;
                }
                if self.graph.is_terminal(&self.runtimes) {
                    break;
                }
            }

            let wake_at = [self.next_retry_at(), bucket_wake]
                .into_iter()
                .flatten()
                .min()
                .filter(|_| self.stop.is_none());
            if self.in_flight.is_empty() && wake_at.is_none() {
                // Nothing running and nothing scheduled: remaining nodes can never run
                tracing::warn!(run_id = %self.run_id, "Run stalled with unresolved nodes");
                break;
            }

            let wake = {
                let cancel = self.cancel.clone();
                let watch_cancel = !self.cancel_seen;
                let grace = self.grace_deadline;
                let far = Instant::now() + Duration::from_secs(86_400);
                let has_in_flight = !self.in_flight.is_empty();

                tokio::select! {
                    biased;
                    _ = cancel.cancelled(), if watch_cancel => Wake::Cancelled,
                    Some(joined) = self.in_flight.join_next_with_id(), if has_in_flight => Wake::Joined(joined),
                    _ = tokio::time::sleep_until(grace.unwrap_or(far)), if grace.is_some() => Wake::GraceExpired,
                    _ = tokio::time::sleep_until(wake_at.unwrap_or(far)), if wake_at.is_some() => Wake::Timer,
                    else => Wake::Timer,
                }
            };

            match wake {
                Wake::Joined(joined) => self.on_joined(joined),
                Wake::Cancelled => self.begin_cancel(),
                Wake::GraceExpired => self.expire_grace().await,
                Wake::Timer => {}
            }
        }

        self.finish()
    }

    /// Failed nodes whose backoff elapsed re-enter `pending`
    fn promote_due_retries(&mut self) {
        let now = Instant::now();
        for (id, rt) in self.runtimes.iter_mut() {
            if rt.state == NodeState::Failed && rt.retry_at.is_some_and(|at| at <= now) {
                tracing::debug!(run_id = %self.run_id, node_id = %id, attempt = rt.attempts + 1, "Retrying node");
                rt.state = NodeState::Pending;
                rt.retry_at = None;
            }
        }
    }

    fn next_retry_at(&self) -> Option<Instant> {
        self.runtimes
            .values()
            .filter(|rt| rt.state == NodeState::Failed)
            .filter_map(|rt| rt.retry_at)
            .min()
    }

    /// Skip pending nodes that can no longer run, in dependency order so
    /// skips cascade in one pass, then mark the runnable ones ready. Once
    /// stopping, only skips are applied.
    fn resolve_pending(&mut self) {
        let graph = Arc::clone(&self.graph);
        for id in graph.topological_order() {
            if self.runtimes.get(id).map(|rt| rt.state) != Some(NodeState::Pending) {
                continue;
            }
            if let Readiness::Skip(reason) = graph.readiness(id, &self.runtimes) {
                tracing::debug!(run_id = %self.run_id, node_id = %id, ?reason, "Skipping node");
                if let Some(rt) = self.runtimes.get_mut(id) {
                    rt.skip(reason);
                }
            }
        }

        if self.stop.is_some() {
            return;
        }
        for id in graph.ready_nodes(&self.runtimes) {
            self.ready_seq += 1;
            if let Some(rt) = self.runtimes.get_mut(&id) {
                rt.state = NodeState::Ready;
                rt.ready_seq = self.ready_seq;
            }
        }
    }

    /// Admit ready nodes in policy order. Returns when the rate limiter
    /// will next allow a dispatch, if it is what held admission back.
    fn admit(&mut self) -> Option<Instant> {
        let max = self.engine.options.max_parallel();
        if self.in_flight.len() >= max {
            return None;
        }

        let now = Utc::now();
        let workflow = self.graph.name().to_string();
        let candidates: Vec<Candidate> = self
            .graph
            .nodes()
            .filter(|node| {
                self.runtimes
                    .get(&node.id)
                    .is_some_and(|rt| rt.state == NodeState::Ready)
            })
            .map(|node| Candidate {
                id: node.id.clone(),
                seq: self.runtimes.get(&node.id).map_or(0, |rt| rt.ready_seq),
                priority: node.policy.priority,
                deadline: node.policy.deadline,
                resources: node.policy.resources,
                dependency_count: node.dependencies.len(),
                stats: self.engine.history.stats(&history_key(&workflow, &node.id)),
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let order = self
            .scheduler
            .select_next(&candidates, &self.pool.snapshot(), now);

        for id in order {
            if self.in_flight.len() >= max {
                break;
            }
            if let Some(bucket) = self.bucket.as_mut() {
                if !bucket.peek() {
                    return Some(bucket.next_available());
                }
            }
            let requirement = match self.graph.node(&id) {
                Some(node) => node.policy.resources,
                None => continue,
            };
            if !self.pool.try_acquire(&requirement) {
                // Not a failure: the node stays ready
                tracing::trace!(run_id = %self.run_id, node_id = %id, "Insufficient resources");
                continue;
            }
            if let Some(bucket) = self.bucket.as_mut() {
                bucket.take();
            }
            self.launch(&id);
        }
        None
    }

    fn launch(&mut self, id: &NodeId) {
        let Some(node) = self.graph.node(id) else {
            return;
        };
        let Some(rt) = self.runtimes.get_mut(id) else {
            return;
        };
        rt.state = NodeState::Running;
        rt.attempts += 1;
        rt.started_at = Some(Utc::now());
        let attempt = rt.attempts;

        let ctx = NodeContext {
            run_id: self.run_id.clone(),
            node_id: id.clone(),
            attempt,
            vars: Arc::new(self.context.clone()),
            outputs: Arc::new(self.outputs.clone()),
            cancel: self.cancel.clone(),
        };

        let node_span = self
            .engine
            .spans
            .as_ref()
            .map(|factory| factory.start(&self.run_id, id, attempt));
        let span = node_span
            .as_ref()
            .and_then(|s| s.tracing_span())
            .unwrap_or_else(tracing::Span::none);
        if let Some(node_span) = node_span {
            self.spans.insert(id.clone(), node_span);
        }

        let behavior = Arc::clone(&node.behavior);
        let timeout = node.policy.timeout;
        let engine = self.engine.clone();
        let node_id = id.clone();

        let handle = self.in_flight.spawn(
            async move {
                let started = Instant::now();
                let work = behavior.execute(&ctx, &engine);
                let result = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, work).await {
                        Ok(result) => result,
                        Err(_) => Err(NodeError::Timeout { elapsed: limit }),
                    },
                    None => work.await,
                };
                Attempt {
                    node_id,
                    result,
                    elapsed: started.elapsed(),
                }
            }
            .instrument(span),
        );
        self.task_nodes.insert(handle.id(), id.clone());

        tracing::debug!(run_id = %self.run_id, node_id = %id, attempt, "Node started");
        self.emit(LifecycleEvent::node(
            EventKind::NodeStarted,
            &self.run_id,
            id,
            attempt,
        ));
    }

    fn on_joined(&mut self, joined: Result<(tokio::task::Id, Attempt), JoinError>) {
        match joined {
            Ok((task_id, attempt)) => {
                self.task_nodes.remove(&task_id);
                self.complete(&attempt.node_id, attempt.result, attempt.elapsed);
            }
            Err(e) => {
                let Some(node_id) = self.task_nodes.remove(&e.id()) else {
                    tracing::error!(run_id = %self.run_id, error = %e, "Unknown node task ended");
                    return;
                };
                let error = if e.is_cancelled() {
                    NodeError::Cancelled
                } else {
                    NodeError::execution(format!("node panicked: {e}"))
                };
                let elapsed = self
                    .runtimes
                    .get(&node_id)
                    .and_then(|rt| rt.started_at)
                    .and_then(|at| (Utc::now() - at).to_std().ok())
                    .unwrap_or_default();
                self.complete(&node_id, Err(error), elapsed);
            }
        }
    }

    fn complete(&mut self, id: &NodeId, result: Result<Value, NodeError>, elapsed: Duration) {
        let Some(node) = self.graph.node(id) else {
            return;
        };
        self.pool.release(&node.policy.resources);
        let critical = node.critical;
        let max_attempts = node.policy.max_attempts();
        let backoff = |attempt: u32| node.policy.backoff_delay(attempt);
        let key = history_key(self.graph.name(), id);
        let stopping = self.stop.is_some() || self.cancel.is_cancelled();

        let Some(rt) = self.runtimes.get_mut(id) else {
            return;
        };
        rt.duration = Some(elapsed);
        rt.completed_at = Some(Utc::now());
        let attempt = rt.attempts;

        let span_outcome;
        let event;
        match result {
            Ok(output) => {
                rt.state = NodeState::Completed;
                rt.result = Some(output.clone());
                rt.error = None;
                self.outputs.insert(id.clone(), output.clone());
                self.context.insert(id.clone(), output);
                self.engine.history.record(
                    &key,
                    Sample {
                        success: true,
                        duration: elapsed,
                    },
                );
                span_outcome = SpanOutcome::Completed;
                event = LifecycleEvent::node(EventKind::NodeCompleted, &self.run_id, id, attempt)
                    .with_duration(elapsed);
            }
            Err(error) => {
                rt.state = NodeState::Failed;
                rt.error = Some(error.clone());
                span_outcome = match &error {
                    NodeError::Cancelled => SpanOutcome::Cancelled,
                    e => SpanOutcome::Failed(e.to_string()),
                };

                if error.is_retryable() && attempt < max_attempts && !stopping {
                    let mut delay = backoff(attempt).min(MAX_RETRY_DELAY);
                    if self.engine.options.retry_jitter {
                        delay += delay.mul_f64(rand::random::<f64>() * 0.25);
                    }
                    rt.retry_at = Some(instant_after(delay));
                    tracing::info!(
                        run_id = %self.run_id,
                        node_id = %id,
                        attempt,
                        max_attempts,
                        delay_ms = millis(delay),
                        error = %error,
                        "Node failed, scheduling retry"
                    );
                    event = LifecycleEvent::node(
                        EventKind::NodeRetryScheduled,
                        &self.run_id,
                        id,
                        attempt,
                    )
                    .with_duration(elapsed)
                    .with_error(&error)
                    .with_retry_in(delay);
                } else {
                    rt.retry_at = None;
                    self.engine.history.record(
                        &key,
                        Sample {
                            success: false,
                            duration: elapsed,
                        },
                    );
                    tracing::warn!(
                        run_id = %self.run_id,
                        node_id = %id,
                        attempt,
                        critical,
                        error = %error,
                        "Node failed"
                    );
                    event = LifecycleEvent::node(EventKind::NodeFailed, &self.run_id, id, attempt)
                        .with_duration(elapsed)
                        .with_error(&error);

                    if critical && self.stop.is_none() && error != NodeError::Cancelled {
                        tracing::error!(
                            run_id = %self.run_id,
                            node_id = %id,
                            "Critical node failed, aborting run"
                        );
                        self.stop = Some(Stop::Abort {
                            node: id.clone(),
                            error,
                        });
                    }
                }
            }
        }

        if let Some(span) = self.spans.remove(id) {
            span.finish(span_outcome);
        }
        self.emit(event);
    }

    fn begin_cancel(&mut self) {
        if self.cancel_seen {
            return;
        }
        self.cancel_seen = true;
        tracing::info!(
            run_id = %self.run_id,
            in_flight = self.in_flight.len(),
            grace_ms = millis(self.engine.options.grace_period),
            "Run cancelled"
        );
        if self.stop.is_none() {
            self.stop = Some(Stop::Cancelled);
        }
        self.cancel.cancel();
        self.grace_deadline = Some(instant_after(self.engine.options.grace_period));
    }

    /// Abort whatever is still running after the grace period
    async fn expire_grace(&mut self) {
        self.grace_deadline = None;
        if self.in_flight.is_empty() {
            return;
        }
        tracing::warn!(
            run_id = %self.run_id,
            in_flight = self.in_flight.len(),
            "Grace period expired, aborting in-flight nodes"
        );
        self.in_flight.abort_all();
        while let Some(joined) = self.in_flight.join_next_with_id().await {
            self.on_joined(joined);
        }
    }

    fn finish(mut self) -> RunReport {
        let skip_reason = match &self.stop {
            Some(Stop::Cancelled) => SkipReason::Cancelled,
            _ => SkipReason::Aborted,
        };

        let mut late_failures = Vec::new();
        for id in self.graph.topological_order() {
            let Some(rt) = self.runtimes.get_mut(id) else {
                continue;
            };
            match rt.state {
                NodeState::Pending | NodeState::Ready => rt.skip(skip_reason),
                NodeState::Failed if rt.retry_at.is_some() => {
                    rt.retry_at = None;
                    late_failures.push((id.clone(), rt.attempts, rt.error.clone()));
                }
                NodeState::Running => {
                    rt.state = NodeState::Failed;
                    rt.error = Some(NodeError::Cancelled);
                    late_failures.push((id.clone(), rt.attempts, rt.error.clone()));
                }
                _ => {}
            }
        }
        for (id, attempt, error) in late_failures {
            let key = history_key(self.graph.name(), &id);
            let duration = self
                .runtimes
                .get(&id)
                .and_then(|rt| rt.duration)
                .unwrap_or_default();
            self.engine.history.record(
                &key,
                Sample {
                    success: false,
                    duration,
                },
            );
            let mut event = LifecycleEvent::node(EventKind::NodeFailed, &self.run_id, &id, attempt);
            if let Some(error) = error {
                event = event.with_error(error);
            }
            self.emit(event);
        }

        let (state, error) = match self.stop.take() {
            Some(Stop::Cancelled) => (RunState::Cancelled, Some(RunError::Cancelled)),
            Some(Stop::Abort { node, error }) => (
                RunState::Failed,
                Some(RunError::CriticalPathAbort {
                    node,
                    source: error,
                }),
            ),
            None => (RunState::Completed, None),
        };

        let elapsed = self.started.elapsed();
        let kind = match state {
            RunState::Completed => EventKind::WorkflowCompleted,
            RunState::Cancelled => EventKind::WorkflowCancelled,
            _ => EventKind::WorkflowFailed,
        };
        let mut event = LifecycleEvent::workflow(kind, &self.run_id).with_duration(elapsed);
        if let Some(error) = &error {
            event = event.with_error(error);
        }
        self.emit(event);

        let nodes = self.node_statuses();
        let stats = RunStats::from_nodes(&nodes);
        tracing::info!(
            run_id = %self.run_id,
            state = ?state,
            completed = stats.completed,
            failed = stats.failed,
            skipped = stats.skipped,
            duration_ms = millis(elapsed),
            "Workflow run finished"
        );
        self.publish(state);

        RunReport {
            run_id: self.run_id,
            workflow: self.graph.name().to_string(),
            state,
            started_at: self.started_at,
            completed_at: Utc::now(),
            duration_ms: millis(elapsed),
            nodes,
            stats,
            context: self.context,
            error,
        }
    }

    fn node_statuses(&self) -> Vec<NodeStatus> {
        self.graph
            .nodes()
            .filter_map(|node| {
                let rt = self.runtimes.get(&node.id)?;
                Some(NodeStatus {
                    id: node.id.clone(),
                    node_type: node.node_type,
                    state: rt.state,
                    attempts: rt.attempts,
                    critical: node.critical,
                    started_at: rt.started_at,
                    completed_at: rt.completed_at,
                    duration_ms: rt.duration.map(millis),
                    error: rt.error.clone(),
                    skip_reason: rt.skip_reason,
                    output: rt.result.clone(),
                })
            })
            .collect()
    }

    fn publish(&self, state: RunState) {
        let Some(tx) = &self.status else {
            return;
        };
        let nodes = self.node_statuses();
        let stats = RunStats::from_nodes(&nodes);
        tx.send_replace(RunStatus {
            run_id: self.run_id.clone(),
            workflow: self.graph.name().to_string(),
            state,
            nodes,
            stats,
        });
    }

    fn emit(&self, event: LifecycleEvent) {
        self.engine.sink.emit(&event);
    }
}
