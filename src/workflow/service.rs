//! Submission API: submit, status, cancel and wait on runs by id

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::cancel::CancellationToken;
use super::definition::WorkflowDefinition;
use super::error::ServiceError;
use super::events::{EventSink, SpanFactory};
use super::runner::{Engine, RunOptions, new_run_id};
use super::state::{NodeState, NodeStatus, RunReport, RunState, RunStats, RunStatus};
use crate::history::ExecutionHistory;

/// Identifier returned by [`WorkflowService::submit`]
pub type RunId = String;

struct RunHandle {
    status: watch::Receiver<RunStatus>,
    cancel: CancellationToken,
    join: Mutex<Option<JoinHandle<RunReport>>>,
}

/// Owns submitted runs. Each service instance has its own history, sink and
/// run table.
pub struct WorkflowService {
    engine: Engine,
    runs: Mutex<HashMap<RunId, Arc<RunHandle>>>,
}

impl WorkflowService {
    pub fn new(options: RunOptions) -> Self {
        Self::with_engine(Engine::new(options))
    }

    pub fn with_engine(engine: Engine) -> Self {
        Self {
            engine,
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_sink(self, sink: Arc<dyn EventSink>) -> Self {
        Self::with_engine(self.engine.with_sink(sink))
    }

    pub fn with_spans(self, spans: Arc<dyn SpanFactory>) -> Self {
        Self::with_engine(self.engine.with_spans(spans))
    }

    pub fn with_history(self, history: Arc<ExecutionHistory>) -> Self {
        Self::with_engine(self.engine.with_history(history))
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn history(&self) -> &Arc<ExecutionHistory> {
        self.engine.history()
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<RunId, Arc<RunHandle>>> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle(&self, run_id: &str) -> Result<Arc<RunHandle>, ServiceError> {
        self.runs()
            .get(run_id)
            .cloned()
            .ok_or_else(|| ServiceError::UnknownRun(run_id.to_string()))
    }

    /// Validate `definition` and start running it in the background.
    ///
    /// `options` replace the service's run options for this run only.
    /// Validation errors are returned here and no run is created. Must be
    /// called from within a tokio runtime.
    pub fn submit(
        &self,
        definition: &WorkflowDefinition,
        initial: serde_json::Map<String, Value>,
        options: Option<RunOptions>,
    ) -> Result<RunId, ServiceError> {
        let engine = match options {
            Some(options) => self.engine.clone().with_options(options),
            None => self.engine.clone(),
        };
        let graph = engine.prepare(definition)?;
        let run_id = new_run_id();

        let nodes: Vec<NodeStatus> = graph
            .nodes()
            .map(|node| NodeStatus {
                id: node.id.clone(),
                node_type: node.node_type,
                state: NodeState::Pending,
                attempts: 0,
                critical: node.critical,
                started_at: None,
                completed_at: None,
                duration_ms: None,
                error: None,
                skip_reason: None,
                output: None,
            })
            .collect();
        let pending = RunStatus {
            run_id: run_id.clone(),
            workflow: graph.name().to_string(),
            state: RunState::Pending,
            stats: RunStats::from_nodes(&nodes),
            nodes,
        };

        let (tx, rx) = watch::channel(pending);
        let cancel = CancellationToken::new();
        let policy = engine.options().policy;
        let id = run_id.clone();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            engine.execute(id, graph, initial, token, Some(tx)).await
        });

        tracing::info!(run_id = %run_id, workflow = %definition.name, %policy, "Submitted workflow run");
        self.runs().insert(
            run_id.clone(),
            Arc::new(RunHandle {
                status: rx,
                cancel,
                join: Mutex::new(Some(join)),
            }),
        );
        Ok(run_id)
    }

    /// Latest snapshot of a run
    pub fn status(&self, run_id: &str) -> Result<RunStatus, ServiceError> {
        Ok(self.handle(run_id)?.status.borrow().clone())
    }

    /// Request cancellation. Cancelling a finished run is a no-op.
    pub fn cancel(&self, run_id: &str) -> Result<(), ServiceError> {
        let handle = self.handle(run_id)?;
        if !handle.status.borrow().state.is_finished() {
            tracing::info!(run_id = %run_id, "Cancelling workflow run");
        }
        handle.cancel.cancel();
        Ok(())
    }

    /// Wait for a run to finish and take its report. The report can be
    /// collected once.
    pub async fn wait(&self, run_id: &str) -> Result<RunReport, ServiceError> {
        let handle = self.handle(run_id)?;
        let join = handle
            .join
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| ServiceError::AlreadyCollected(run_id.to_string()))?;

        join.await.map_err(|e| ServiceError::Join {
            run_id: run_id.to_string(),
            message: e.to_string(),
        })
    }

    /// Ids of every run this service knows about
    pub fn run_ids(&self) -> Vec<RunId> {
        let mut ids: Vec<RunId> = self.runs().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop finished runs whose report was already collected
    pub fn prune(&self) -> usize {
        let mut runs = self.runs();
        let before = runs.len();
        runs.retain(|_, handle| {
            let collected = handle
                .join
                .lock()
                .map(|join| join.is_none())
                .unwrap_or(false);
            !(collected && handle.status.borrow().state.is_finished())
        });
        before - runs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::definition::NodeSpec;
    use crate::workflow::error::{NodeError, ValidationError};
    use crate::workflow::events::CollectingSink;
    use crate::workflow::resources::Resources;
    use crate::workflow::scheduler::SchedulingPolicy;
    use serde_json::json;
    use std::time::Duration;

    fn service() -> WorkflowService {
        WorkflowService::new(RunOptions::default()).with_sink(Arc::new(CollectingSink::new()))
    }

    #[tokio::test]
    async fn test_submit_and_wait() {
        let service = service();
        let def = WorkflowDefinition::new("hello")
            .node(NodeSpec::task("greet", |ctx| async move {
                let name = ctx.get("name").and_then(Value::as_str).unwrap_or("nobody");
                Ok(json!(format!("hello {name}")))
            }));

        let mut vars = serde_json::Map::new();
        vars.insert("name".into(), json!("dagflow"));
        let run_id = service.submit(&def, vars, None).unwrap();
        let report = service.wait(&run_id).await.unwrap();

        assert_eq!(report.run_id, run_id);
        assert_eq!(report.output("greet"), Some(&json!("hello dagflow")));
        assert_eq!(service.status(&run_id).unwrap().state, RunState::Completed);
        assert_eq!(service.history().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_rejects_cycle_synchronously() {
        let service = service();
        let def = WorkflowDefinition::new("loop")
            .node(NodeSpec::task("a", |_| async { Ok(Value::Null) }).depends_on(["b"]))
            .node(NodeSpec::task("b", |_| async { Ok(Value::Null) }).depends_on(["a"]));

        let err = service.submit(&def, serde_json::Map::new(), None).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Validation(ValidationError::Cycle { .. })
        ));
        assert!(service.run_ids().is_empty());
    }

    #[tokio::test]
    async fn test_submit_with_per_run_options() {
        let service = service();
        let order = Arc::new(Mutex::new(Vec::new()));
        let now = chrono::Utc::now();
        let mut def = WorkflowDefinition::new("policies");
        for (id, priority, due_in) in [("important", 9u8, 3600i64), ("urgent", 2, 1)] {
            let order = Arc::clone(&order);
            def = def.node(
                NodeSpec::task(id, move |ctx| {
                    let order = Arc::clone(&order);
                    async move {
                        order.lock().unwrap().push(ctx.node_id.clone());
                        Ok(Value::Null)
                    }
                })
                .with_priority(priority)
                .with_deadline(now + chrono::Duration::seconds(due_in)),
            );
        }
        let serial = |policy| RunOptions {
            max_parallel_tasks: 1,
            policy,
            ..Default::default()
        };

        let by_priority = service
            .submit(&def, serde_json::Map::new(), Some(serial(SchedulingPolicy::PriorityBased)))
            .unwrap();
        service.wait(&by_priority).await.unwrap();
        let first: Vec<String> = std::mem::take(&mut *order.lock().unwrap());

        let by_deadline = service
            .submit(&def, serde_json::Map::new(), Some(serial(SchedulingPolicy::DeadlineDriven)))
            .unwrap();
        service.wait(&by_deadline).await.unwrap();
        let second: Vec<String> = std::mem::take(&mut *order.lock().unwrap());

        assert_eq!(first, vec!["important", "urgent"]);
        assert_eq!(second, vec!["urgent", "important"]);
        assert_eq!(service.run_ids().len(), 2);
        // The service's own options are untouched
        assert_eq!(service.engine().options(), &RunOptions::default());
    }

    #[tokio::test]
    async fn test_per_run_capacity_validated_at_submit() {
        let service = service();
        let def = WorkflowDefinition::new("heavy").node(
            NodeSpec::task("big", |_| async { Ok(Value::Null) })
                .with_resources(Resources { cpu: 3, ..Resources::ZERO }),
        );
        let small = RunOptions {
            capacity: Some(Resources { cpu: 2, ..Resources::ZERO }),
            ..Default::default()
        };

        let err = service.submit(&def, serde_json::Map::new(), Some(small)).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Validation(ValidationError::ExceedsCapacity { .. })
        ));
        assert!(service.run_ids().is_empty());

        // Fits the service's default capacity
        let run_id = service.submit(&def, serde_json::Map::new(), None).unwrap();
        assert!(service.wait(&run_id).await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let service = service();
        assert!(matches!(
            service.status("nope"),
            Err(ServiceError::UnknownRun(_))
        ));
        assert!(matches!(service.cancel("nope"), Err(ServiceError::UnknownRun(_))));
        assert!(matches!(
            service.wait("nope").await,
            Err(ServiceError::UnknownRun(_))
        ));
    }

    #[tokio::test]
    async fn test_report_collected_once() {
        let service = service();
        let def = WorkflowDefinition::new("once").node(NodeSpec::task("a", |_| async { Ok(Value::Null) }));
        let run_id = service.submit(&def, serde_json::Map::new(), None).unwrap();

        service.wait(&run_id).await.unwrap();
        assert!(matches!(
            service.wait(&run_id).await,
            Err(ServiceError::AlreadyCollected(_))
        ));
        assert_eq!(service.prune(), 1);
        assert!(service.run_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_running_workflow() {
        let service = WorkflowService::new(RunOptions {
            grace_period: Duration::from_millis(50),
            ..Default::default()
        })
        .with_sink(Arc::new(CollectingSink::new()));
        let def = WorkflowDefinition::new("long")
            .node(NodeSpec::task("sleepy", |ctx| async move {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(60)) => Ok(Value::Null),
                    _ = ctx.cancel.cancelled() => Err(NodeError::Cancelled),
                }
            }))
            .node(NodeSpec::task("next", |_| async { Ok(Value::Null) }).depends_on(["sleepy"]));

        let run_id = service.submit(&def, serde_json::Map::new(), None).unwrap();
        let status = service.status(&run_id).unwrap();
        assert_eq!(status.stats.total, 2);
        assert_eq!(status.stats.pending, 2);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            service.status(&run_id).unwrap().node("sleepy").unwrap().state,
            NodeState::Running
        );

        service.cancel(&run_id).unwrap();
        let report = service.wait(&run_id).await.unwrap();
        assert_eq!(report.state, RunState::Cancelled);
        assert_eq!(report.node("next").unwrap().state, NodeState::Skipped);

        let status = service.status(&run_id).unwrap();
        assert_eq!(status.state, RunState::Cancelled);
        // Cancelling a finished run is harmless
        service.cancel(&run_id).unwrap();
    }
}
