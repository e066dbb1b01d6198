//! Declarative node behaviours backed by shell commands and template
//! expressions, as used by workflow files

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;

use super::error::NodeError;
use super::node::{ConditionFn, LoopFn, LoopStep, NodeContext, TaskFn, WaitFn};
use crate::process::{CommandOutput, ProcessError, run_shell};
use crate::template::{TemplateContext, TemplateEngine};

/// Longest stderr excerpt carried in an error message
const STDERR_EXCERPT: usize = 400;

/// Shared by every shell-backed node of one workflow.
#[derive(Debug, Clone, Default)]
pub struct ShellEnv {
    pub templates: Arc<TemplateEngine>,
    pub workdir: Option<PathBuf>,
}

impl ShellEnv {
    pub fn new(workdir: Option<PathBuf>) -> Self {
        Self {
            templates: Arc::new(TemplateEngine::new()),
            workdir,
        }
    }

    async fn run(
        &self,
        template: &str,
        tctx: &TemplateContext,
        ctx: &NodeContext,
    ) -> Result<CommandOutput, NodeError> {
        let command = self.templates.render_trimmed(template, tctx)?;
        tracing::debug!(run_id = %ctx.run_id, node_id = %ctx.node_id, command = %command, "Running command");

        run_shell(&command, self.workdir.as_deref(), &ctx.cancel)
            .await
            .map_err(|e| match e {
                ProcessError::Cancelled { .. } => NodeError::Cancelled,
                other => NodeError::execution(other.to_string()),
            })
    }
}

fn output_value(output: &CommandOutput) -> Value {
    json!({
        "stdout": output.stdout,
        "stderr": output.stderr,
        "exit_code": output.exit_code,
    })
}

fn exit_failure(output: &CommandOutput) -> NodeError {
    let stderr = output.stderr.trim();
    let excerpt: String = stderr.chars().take(STDERR_EXCERPT).collect();
    let code = output
        .exit_code
        .map_or_else(|| "unknown".to_string(), |c| c.to_string());
    if excerpt.is_empty() {
        NodeError::execution(format!("command exited with code {code}"))
    } else {
        NodeError::execution(format!("command exited with code {code}: {excerpt}"))
    }
}

/// `task.run`: a rendered command; non-zero exit fails the node
#[derive(Debug)]
pub struct ShellTask {
    pub env: ShellEnv,
    pub command: String,
}

#[async_trait]
impl TaskFn for ShellTask {
    async fn call(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        let output = self
            .env
            .run(&self.command, &TemplateContext::from_node(ctx), ctx)
            .await?;
        if !output.success() {
            return Err(exit_failure(&output));
        }
        Ok(output_value(&output))
    }
}

/// `condition.if`: a boolean template expression
#[derive(Debug)]
pub struct ExpressionCondition {
    pub templates: Arc<TemplateEngine>,
    pub expression: String,
}

#[async_trait]
impl ConditionFn for ExpressionCondition {
    async fn evaluate(&self, ctx: &NodeContext) -> Result<bool, NodeError> {
        Ok(self
            .templates
            .evaluate_condition(&self.expression, &TemplateContext::from_node(ctx))?)
    }
}

/// `loop.run` + `loop.until`: the command runs once per iteration with
/// `iteration` and `previous` in scope; `until` sees `output` and
/// `iteration`. A failing command does not fail the node by itself.
#[derive(Debug)]
pub struct ShellLoop {
    pub env: ShellEnv,
    pub command: String,
    pub until: String,
}

#[async_trait]
impl LoopFn for ShellLoop {
    async fn step(
        &self,
        ctx: &NodeContext,
        iteration: u32,
        previous: Option<&Value>,
    ) -> Result<LoopStep, NodeError> {
        let mut tctx = TemplateContext::from_node(ctx);
        tctx.set_local("iteration", json!(iteration));
        tctx.set_local("previous", previous.cloned().unwrap_or(Value::Null));

        let output = output_value(&self.env.run(&self.command, &tctx, ctx).await?);
        tctx.set_local("output", output.clone());

        if self.env.templates.evaluate_condition(&self.until, &tctx)? {
            Ok(LoopStep::Break(output))
        } else {
            Ok(LoopStep::Continue(output))
        }
    }
}

/// `wait.run`: ready once the command exits 0
#[derive(Debug)]
pub struct ShellWait {
    pub env: ShellEnv,
    pub command: String,
}

#[async_trait]
impl WaitFn for ShellWait {
    async fn is_ready(&self, ctx: &NodeContext) -> Result<bool, NodeError> {
        let output = self
            .env
            .run(&self.command, &TemplateContext::from_node(ctx), ctx)
            .await?;
        Ok(output.success())
    }
}
