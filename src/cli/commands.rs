//! CLI command implementations

use super::output::OutputHandler;
use super::signals;
use crate::config::{EngineConfig, WorkflowFile};
use crate::history::{ExecutionHistory, HistoryStore};
use crate::workflow::{
    CancellationToken, Engine, EventSink, FanoutSink, LifecycleEvent, RunState, SchedulingPolicy,
    ShellEnv, TracingSink, WorkflowService,
};
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Options of `dagflow run`
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub file: PathBuf,
    pub policy: Option<SchedulingPolicy>,
    pub max_parallel: Option<usize>,
    /// `key=value` overrides of the workflow's `vars`
    pub set: Vec<String>,
}

struct HandlerSink(Arc<dyn OutputHandler>);

impl EventSink for HandlerSink {
    fn emit(&self, event: &LifecycleEvent) {
        self.0.emit(event);
    }
}

/// Parse `key=value`. The value is read as JSON when it parses, otherwise it
/// is kept as a string.
pub fn parse_assignment(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("empty key in '{raw}'");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn open_history(config: &EngineConfig) -> Option<HistoryStore> {
    if !config.history.enabled {
        return None;
    }
    let opened = config
        .history
        .db_path()
        .and_then(|path| HistoryStore::open(&path));
    match opened {
        Ok(store) => Some(store),
        Err(e) => {
            tracing::warn!(error = %e, "History unavailable, continuing without it");
            None
        }
    }
}

fn workdir_of(file: &Path) -> Option<PathBuf> {
    file.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

/// Run a workflow file. Returns the process exit code.
pub async fn run_workflow(
    args: RunArgs,
    config: &EngineConfig,
    handler: Arc<dyn OutputHandler>,
) -> Result<i32> {
    let file = WorkflowFile::load(&args.file)?;

    let mut initial = file.vars.clone();
    for raw in &args.set {
        let (key, value) = parse_assignment(raw)?;
        initial.insert(key, value);
    }

    let mut options = config.run_options();
    if let Some(policy) = args.policy {
        options.policy = policy;
    }
    if let Some(max_parallel) = args.max_parallel {
        options.max_parallel_tasks = max_parallel.max(1);
    }

    let history = Arc::new(ExecutionHistory::new());
    let mut store = open_history(config);
    if let Some(store) = &store {
        let loaded = store.load_into(&history)?;
        tracing::debug!(samples = loaded, "Loaded node history");
    }

    let sink = FanoutSink::new()
        .with(Arc::new(TracingSink))
        .with(Arc::new(HandlerSink(Arc::clone(&handler))));
    let engine = Engine::new(config.run_options())
        .with_history(history)
        .with_sink(Arc::new(sink));
    let service = WorkflowService::with_engine(engine);

    let definition = file.to_definition(&ShellEnv::new(workdir_of(&args.file)), chrono::Utc::now());
    let run_id = service
        .submit(&definition, initial, Some(options))
        .with_context(|| format!("invalid workflow '{}'", file.name()))?;

    let shutdown = CancellationToken::new();
    let listener = signals::install(&shutdown);

    let report = tokio::select! {
        report = service.wait(&run_id) => report?,
        _ = shutdown.cancelled() => {
            service.cancel(&run_id)?;
            service.wait(&run_id).await?
        }
    };
    listener.abort();

    if let Some(store) = store.as_mut() {
        if let Err(e) = store.record_report(&report) {
            tracing::warn!(error = %e, "Failed to persist node history");
        }
    }

    handler.report(&report);
    // Failed best-effort nodes still count as a completed run
    Ok(if report.state == RunState::Completed { 0 } else { 1 })
}

/// Validate a workflow file: document checks, then graph construction
pub fn validate_workflow(
    file: &Path,
    config: &EngineConfig,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    let workflow = match WorkflowFile::load(file) {
        Ok(workflow) => workflow,
        Err(e) => {
            handler.info(&format!("✗ {e:#}"));
            return Ok(1);
        }
    };

    let definition = workflow.to_definition(&ShellEnv::new(workdir_of(file)), chrono::Utc::now());
    let engine = Engine::new(config.run_options());
    match engine.prepare(&definition) {
        Ok(graph) => {
            handler.info(&format!(
                "✓ Workflow '{}' is valid ({} nodes)",
                graph.name(),
                graph.len()
            ));
            handler.info(&format!("  order: {}", graph.topological_order().join(" → ")));
            let critical: Vec<&str> = graph.critical_nodes().into_iter().map(String::as_str).collect();
            if critical.is_empty() {
                handler.info("  critical: (none)");
            } else {
                handler.info(&format!("  critical: {}", critical.join(", ")));
            }
            Ok(0)
        }
        Err(e) => {
            handler.info(&format!("✗ Workflow '{}' is invalid: {e}", workflow.name()));
            Ok(1)
        }
    }
}

/// Print per-node success rate and mean duration from the history database
pub fn show_history(node: Option<&str>, config: &EngineConfig) -> Result<i32> {
    let path = config.history.db_path()?;
    if !path.exists() {
        println!("(no history recorded at {})", path.display());
        return Ok(0);
    }

    let store = HistoryStore::open(&path)?;
    let history = ExecutionHistory::new();
    store.load_into(&history)?;

    let matches = |key: &str| {
        node.is_none_or(|node| key == node || key.rsplit_once('/').is_some_and(|(_, id)| id == node))
    };

    let stats: Vec<_> = history
        .all_stats()
        .into_iter()
        .filter(|(key, _)| matches(key))
        .collect();
    if stats.is_empty() {
        println!("(no matching history)");
        return Ok(0);
    }

    println!("{:<40} {:>7} {:>9} {:>10}", "NODE", "SAMPLES", "SUCCESS", "MEAN");
    for (key, stat) in stats {
        println!(
            "{:<40} {:>7} {:>8.0}% {:>8}ms",
            key,
            stat.samples,
            stat.success_rate * 100.0,
            stat.mean_duration.as_millis()
        );
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::output::QuietHandler;
    use serde_json::json;
    use tempfile::TempDir;

    fn quiet_config(dir: &Path) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.history.path = Some(dir.join("history.db").to_string_lossy().into_owned());
        config
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(parse_assignment("count=3").unwrap(), ("count".into(), json!(3)));
        assert_eq!(
            parse_assignment("name=release candidate").unwrap(),
            ("name".into(), json!("release candidate"))
        );
        assert_eq!(parse_assignment("flag=true").unwrap().1, json!(true));
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=1").is_err());
    }

    #[test]
    fn test_validate_reports_cycle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("loop.toml");
        std::fs::write(
            &path,
            r#"
            [nodes.a]
            type = "task"
            depends_on = ["b"]
            task = { run = "true" }

            [nodes.b]
            type = "task"
            depends_on = ["a"]
            task = { run = "true" }
        "#,
        )
        .unwrap();

        let code = validate_workflow(&path, &quiet_config(dir.path()), &QuietHandler).unwrap();
        assert_eq!(code, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_records_history() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.toml");
        std::fs::write(
            &path,
            r#"
            [vars]
            who = "world"

            [nodes.greet]
            type = "task"
            task = { run = "echo hello {{ vars.who }}" }

            [nodes.check]
            type = "condition"
            depends_on = ["greet"]
            condition = { if = "'hello' in nodes.greet.stdout" }
        "#,
        )
        .unwrap();
        let config = quiet_config(dir.path());

        let args = RunArgs {
            file: path.clone(),
            set: vec!["who=dagflow".into()],
            ..Default::default()
        };
        let code = run_workflow(args, &config, Arc::new(QuietHandler)).await.unwrap();
        assert_eq!(code, 0);

        let store = HistoryStore::open(&dir.path().join("history.db")).unwrap();
        let records = store.recent(Some("greet"), 10).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].success);
        assert_eq!(records[0].workflow, "hello");

        assert_eq!(show_history(Some("greet"), &config).unwrap(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_failing_critical_node_exits_nonzero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(
            &path,
            r#"
            [nodes.only]
            type = "task"
            task = { run = "exit 3" }
        "#,
        )
        .unwrap();
        let mut config = quiet_config(dir.path());
        config.history.enabled = false;

        let args = RunArgs {
            file: path,
            ..Default::default()
        };
        let code = run_workflow(args, &config, Arc::new(QuietHandler)).await.unwrap();
        assert_eq!(code, 1);
    }
}
