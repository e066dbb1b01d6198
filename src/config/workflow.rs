//! Workflow documents: declarative node definitions loaded from TOML or JSON

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::template::TemplateEngine;
use crate::workflow::{
    DEFAULT_RETRY_DELAY, Edge, ExpressionCondition, MAX_RETRY_DELAY, NodeConfig, NodeError,
    NodeSpec, NodeType, Resources, ShellEnv, ShellLoop, ShellTask, ShellWait, WorkflowDefinition,
    millis, task_fn,
};

/// Polling interval of a wait node without `check_interval_ms`
const DEFAULT_CHECK_INTERVAL_MS: u64 = 1000;

/// Iteration cap of a loop node without `max_iterations`
const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Latest accepted `deadline_ms`, ten years after submission
const MAX_DEADLINE_MS: u64 = 10 * 365 * 24 * 60 * 60 * 1000;

/// A workflow file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowFile {
    pub name: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub nodes: BTreeMap<String, NodeFile>,

    #[serde(default)]
    pub connections: Vec<Edge>,

    /// Terminal markers for critical-path analysis
    #[serde(default)]
    pub end: Vec<String>,

    /// Initial run context
    #[serde(default)]
    pub vars: serde_json::Map<String, serde_json::Value>,
}

/// One node of a workflow file
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NodeFile {
    #[serde(rename = "type")]
    pub node_type: NodeType,

    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub retry_attempts: u32,

    pub retry_delay_ms: Option<u64>,

    pub timeout_ms: Option<u64>,

    /// 1 (lowest) to 10
    pub priority: Option<u8>,

    /// Deadline relative to submission
    pub deadline_ms: Option<u64>,

    pub critical: Option<bool>,

    #[serde(default)]
    pub resources: Resources,

    pub task: Option<TaskSection>,
    pub condition: Option<ConditionSection>,
    pub r#loop: Option<LoopSection>,
    pub wait: Option<WaitSection>,
    pub parallel: Option<ParallelSection>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TaskSection {
    pub run: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionSection {
    #[serde(rename = "if")]
    pub expression: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoopSection {
    pub run: String,
    pub until: String,
    pub max_iterations: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WaitSection {
    pub run: String,
    pub max_wait_ms: u64,
    pub check_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ParallelSection {
    pub sub_workflows: Vec<WorkflowFile>,
}

impl NodeFile {
    fn sections(&self) -> Vec<NodeType> {
        let mut present = Vec::new();
        if self.task.is_some() {
            present.push(NodeType::Task);
        }
        if self.condition.is_some() {
            present.push(NodeType::Condition);
        }
        if self.r#loop.is_some() {
            present.push(NodeType::Loop);
        }
        if self.wait.is_some() {
            present.push(NodeType::Wait);
        }
        if self.parallel.is_some() {
            present.push(NodeType::Parallel);
        }
        present
    }
}

impl WorkflowFile {
    /// Read and validate a `.toml` or `.json` workflow file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let mut workflow: Self = if is_json {
            serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?
        } else {
            toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?
        };

        if workflow.name.is_none() {
            workflow.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned());
        }

        workflow.validate(&TemplateEngine::new()).map_err(|errors| {
            anyhow::anyhow!("workflow validation failed:\n  {}", errors.join("\n  "))
        })?;

        Ok(workflow)
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("workflow")
    }

    /// Collect every problem in the document rather than stopping at the
    /// first one
    pub fn validate(&self, templates: &TemplateEngine) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        self.collect_errors(templates, "", &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn collect_errors(&self, templates: &TemplateEngine, prefix: &str, errors: &mut Vec<String>) {
        let ids: HashSet<&str> = self.nodes.keys().map(String::as_str).collect();

        for (id, node) in &self.nodes {
            let at = format!("{prefix}node '{id}'");

            for dep in &node.depends_on {
                if !ids.contains(dep.as_str()) {
                    errors.push(format!("{at} depends on unknown node '{dep}'"));
                }
            }

            if let Some(priority) = node.priority.filter(|p| !(1..=10).contains(p)) {
                errors.push(format!("{at} has priority {priority}, expected 1 to 10"));
            }
            if node.timeout_ms == Some(0) {
                errors.push(format!("{at} has a zero timeout"));
            }
            if let Some(ms) = node.deadline_ms.filter(|ms| *ms > MAX_DEADLINE_MS) {
                errors.push(format!(
                    "{at} has deadline_ms {ms}, expected at most {MAX_DEADLINE_MS}"
                ));
            }
            let max_delay = millis(MAX_RETRY_DELAY);
            if let Some(ms) = node.retry_delay_ms.filter(|ms| *ms > max_delay) {
                errors.push(format!(
                    "{at} has retry_delay_ms {ms}, expected at most {max_delay}"
                ));
            }

            let sections = node.sections();
            if !sections.contains(&node.node_type) {
                errors.push(format!(
                    "{at} of type {} is missing its [{}] section",
                    node.node_type, node.node_type
                ));
            }
            for other in sections.iter().filter(|t| **t != node.node_type) {
                errors.push(format!(
                    "{at} of type {} has a [{other}] section",
                    node.node_type
                ));
            }

            let mut check_template = |field: &str, source: &str| {
                if let Err(e) = templates.validate(source) {
                    errors.push(format!("{at} {field}: {e}"));
                }
            };
            if let Some(task) = &node.task {
                check_template("task.run", &task.run);
            }
            if let Some(section) = &node.r#loop {
                check_template("loop.run", &section.run);
            }
            if let Some(wait) = &node.wait {
                check_template("wait.run", &wait.run);
            }

            let mut check_expression = |field: &str, source: &str| {
                if let Err(e) = templates.validate_expression(source) {
                    errors.push(format!("{at} {field}: {e}"));
                }
            };
            if let Some(condition) = &node.condition {
                check_expression("condition.if", &condition.expression);
            }
            if let Some(section) = &node.r#loop {
                check_expression("loop.until", &section.until);
                if section.max_iterations == Some(0) {
                    errors.push(format!("{at} loop.max_iterations must be at least 1"));
                }
            }
            if let Some(wait) = &node.wait {
                if wait.check_interval_ms == Some(0) {
                    errors.push(format!("{at} wait.check_interval_ms must be positive"));
                }
            }
            if let Some(parallel) = &node.parallel {
                if parallel.sub_workflows.is_empty() {
                    errors.push(format!("{at} parallel.sub_workflows is empty"));
                }
                for (index, sub) in parallel.sub_workflows.iter().enumerate() {
                    sub.collect_errors(templates, &format!("{at} sub-workflow {index}: "), errors);
                }
            }
        }

        let mut seen_edges = HashSet::new();
        for edge in &self.connections {
            if !seen_edges.insert((edge.from.as_str(), edge.to.as_str())) {
                errors.push(format!(
                    "{prefix}duplicate connection {} -> {}",
                    edge.from, edge.to
                ));
            }
            for end in [&edge.from, &edge.to] {
                if !ids.contains(end.as_str()) {
                    errors.push(format!(
                        "{prefix}connection {} -> {} references unknown node '{end}'",
                        edge.from, edge.to
                    ));
                }
            }
        }

        for end in &self.end {
            if !ids.contains(end.as_str()) {
                errors.push(format!("{prefix}end marker '{end}' is not a node"));
            }
        }
    }

    /// Convert into an executable definition. Relative deadlines are
    /// anchored at `submitted_at`.
    pub fn to_definition(&self, shell: &ShellEnv, submitted_at: DateTime<Utc>) -> WorkflowDefinition {
        let mut def = WorkflowDefinition::new(self.name());
        for (id, node) in &self.nodes {
            def = def.node(node_spec(id, node, shell, submitted_at));
        }
        def.connections = self.connections.clone();
        def.end_nodes = self.end.clone();
        def
    }
}

fn node_spec(id: &str, node: &NodeFile, shell: &ShellEnv, submitted_at: DateTime<Utc>) -> NodeSpec {
    let mut spec = NodeSpec::new(id, node_config(id, node, shell, submitted_at))
        .depends_on(node.depends_on.iter().cloned())
        .with_retry(
            node.retry_attempts,
            node.retry_delay_ms
                .map_or(DEFAULT_RETRY_DELAY, Duration::from_millis),
        )
        .with_resources(node.resources);

    if let Some(ms) = node.timeout_ms {
        spec = spec.with_timeout(Duration::from_millis(ms));
    }
    if let Some(priority) = node.priority {
        spec = spec.with_priority(priority);
    }
    if let Some(ms) = node.deadline_ms {
        match deadline_after(submitted_at, ms) {
            Some(deadline) => spec = spec.with_deadline(deadline),
            None => tracing::warn!(node_id = %id, deadline_ms = ms, "Deadline out of range, ignoring"),
        }
    }
    if let Some(critical) = node.critical {
        spec = spec.critical(critical);
    }
    spec
}

fn deadline_after(submitted_at: DateTime<Utc>, ms: u64) -> Option<DateTime<Utc>> {
    let delta = chrono::Duration::try_milliseconds(i64::try_from(ms).ok()?)?;
    submitted_at.checked_add_signed(delta)
}

/// Build the behaviour for the node's declared type. A validated file always
/// has the matching section; a missing one yields a task that fails.
fn node_config(id: &str, node: &NodeFile, shell: &ShellEnv, submitted_at: DateTime<Utc>) -> NodeConfig {
    let missing = || {
        let message = format!("node '{id}' has no [{}] section", node.node_type);
        NodeConfig::Task(task_fn(move |_| {
            let message = message.clone();
            async move { Err(NodeError::execution(message)) }
        }))
    };

    match node.node_type {
        NodeType::Task => node.task.as_ref().map_or_else(missing, |task| {
            NodeConfig::Task(Arc::new(ShellTask {
                env: shell.clone(),
                command: task.run.clone(),
            }))
        }),
        NodeType::Condition => node.condition.as_ref().map_or_else(missing, |condition| {
            NodeConfig::Condition(Arc::new(ExpressionCondition {
                templates: Arc::clone(&shell.templates),
                expression: condition.expression.clone(),
            }))
        }),
        NodeType::Loop => node.r#loop.as_ref().map_or_else(missing, |section| NodeConfig::Loop {
            step: Arc::new(ShellLoop {
                env: shell.clone(),
                command: section.run.clone(),
                until: section.until.clone(),
            }),
            max_iterations: section.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
        }),
        NodeType::Wait => node.wait.as_ref().map_or_else(missing, |wait| NodeConfig::Wait {
            condition: Arc::new(ShellWait {
                env: shell.clone(),
                command: wait.run.clone(),
            }),
            max_wait: Duration::from_millis(wait.max_wait_ms),
            check_interval: Duration::from_millis(
                wait.check_interval_ms.unwrap_or(DEFAULT_CHECK_INTERVAL_MS),
            ),
        }),
        NodeType::Parallel => node.parallel.as_ref().map_or_else(missing, |parallel| {
            NodeConfig::Parallel {
                sub_workflows: parallel
                    .sub_workflows
                    .iter()
                    .enumerate()
                    .map(|(index, sub)| {
                        let mut def = sub.to_definition(shell, submitted_at);
                        if sub.name.is_none() {
                            def.name = format!("{id}#{index}");
                        }
                        def
                    })
                    .collect(),
            }
        }),
    }
}
