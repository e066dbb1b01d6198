//! Template engine for rendering node commands

use super::context::TemplateContext;
use super::errors::TemplateError;
use super::filters;
use minijinja::{Environment, ErrorKind};

/// Wraps minijinja with the custom filters and strict undefined handling.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    pub(super) env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
        filters::register_filters(&mut env);
        Self { env }
    }

    /// Render a template string against `ctx`.
    ///
    /// ```ignore
    /// let mut ctx = TemplateContext::new();
    /// ctx.add_node("build", json!({"artifact": "app.tar"}));
    /// engine.render("upload {{ nodes.build.artifact }}", &ctx)?;
    /// ```
    pub fn render(&self, template: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
        self.env
            .render_str(template, ctx.to_value())
            .map_err(|e| convert_error(e, ctx))
    }

    pub fn render_trimmed(
        &self,
        template: &str,
        ctx: &TemplateContext,
    ) -> Result<String, TemplateError> {
        self.render(template, ctx).map(|s| s.trim().to_string())
    }

    /// Check syntax without rendering
    pub fn validate(&self, template: &str) -> Result<(), TemplateError> {
        let mut env = self.env.clone();
        env.add_template_owned("__validate__", template.to_string())
            .map_err(|e| TemplateError::syntax(e.to_string(), e.line().unwrap_or(0)))
    }
}

pub(super) fn convert_error(err: minijinja::Error, ctx: &TemplateContext) -> TemplateError {
    let line = err.line().unwrap_or(0);
    match err.kind() {
        ErrorKind::UndefinedError => {
            let name = undefined_name(&err).unwrap_or_else(|| "unknown".to_string());
            let mut known = ctx.known_variables();
            known.extend(ctx.known_keys());
            TemplateError::undefined_variable(name, line, &known)
        }
        ErrorKind::SyntaxError => TemplateError::syntax(err.to_string(), line),
        ErrorKind::UnknownFilter => TemplateError::filter(
            err.detail().unwrap_or("unknown"),
            err.to_string(),
        ),
        _ => TemplateError::Internal(err),
    }
}

/// Best-effort variable name from the error detail, e.g. "`nodes.fetch`"
fn undefined_name(err: &minijinja::Error) -> Option<String> {
    let detail = err.detail().unwrap_or_default();
    let start = detail.find('`')?;
    let rest = &detail[start + 1..];
    let end = rest.find('`')?;
    Some(rest[..end].to_string())
}
