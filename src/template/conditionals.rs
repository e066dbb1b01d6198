//! Boolean expressions for condition nodes and loop exit checks
//!
//! Expressions use minijinja syntax: `vars.env == 'prod' and not nodes.test.failed`.

use super::context::TemplateContext;
use super::engine::{TemplateEngine, convert_error};
use super::errors::TemplateError;

impl TemplateEngine {
    /// Evaluate `expr` and apply minijinja truthiness. An empty expression
    /// is true.
    pub fn evaluate_condition(
        &self,
        expr: &str,
        ctx: &TemplateContext,
    ) -> Result<bool, TemplateError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Ok(true);
        }
        let compiled = self
            .env
            .compile_expression_owned(expr.to_string())
            .map_err(|e| TemplateError::expression(format!("invalid expression '{expr}': {e}")))?;
        let value = compiled.eval(ctx.to_value()).map_err(|e| convert_error(e, ctx))?;
        Ok(value.is_true())
    }

    /// Evaluate `expr` to a JSON value
    pub fn evaluate_value(
        &self,
        expr: &str,
        ctx: &TemplateContext,
    ) -> Result<serde_json::Value, TemplateError> {
        let compiled = self
            .env
            .compile_expression_owned(expr.trim().to_string())
            .map_err(|e| TemplateError::expression(format!("invalid expression '{expr}': {e}")))?;
        let value = compiled.eval(ctx.to_value()).map_err(|e| convert_error(e, ctx))?;
        serde_json::to_value(&value).map_err(|e| TemplateError::expression(e.to_string()))
    }

    /// Syntax check only
    pub fn validate_expression(&self, expr: &str) -> Result<(), TemplateError> {
        self.env
            .compile_expression_owned(expr.trim().to_string())
            .map(|_| ())
            .map_err(|e| TemplateError::syntax(e.to_string(), e.line().unwrap_or(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> TemplateContext {
        let mut vars = serde_json::Map::new();
        vars.insert("env".into(), json!("prod"));
        vars.insert("replicas".into(), json!(3));
        let mut ctx = TemplateContext::with_vars(vars);
        ctx.add_node("test", json!({"exit_code": 0, "stdout": "ok\n"}));
        ctx
    }

    #[test]
    fn test_equality() {
        let engine = TemplateEngine::new();
        assert!(engine.evaluate_condition("vars.env == 'prod'", &ctx()).unwrap());
        assert!(!engine.evaluate_condition("vars.env != 'prod'", &ctx()).unwrap());
    }

    #[test]
    fn test_boolean_operators() {
        let engine = TemplateEngine::new();
        let ctx = ctx();
        assert!(
            engine
                .evaluate_condition("vars.replicas > 2 and nodes.test.exit_code == 0", &ctx)
                .unwrap()
        );
        assert!(
            engine
                .evaluate_condition("not (vars.replicas > 2) or false", &ctx)
                .is_ok_and(|v| !v)
        );
    }

    #[test]
    fn test_filters_in_expressions() {
        let engine = TemplateEngine::new();
        assert!(
            engine
                .evaluate_condition("(nodes.test.stdout | trim) == 'ok'", &ctx())
                .unwrap()
        );
    }

    #[test]
    fn test_empty_is_true() {
        assert!(TemplateEngine::new().evaluate_condition("  ", &ctx()).unwrap());
    }

    #[test]
    fn test_undefined_reference_fails() {
        let err = TemplateEngine::new()
            .evaluate_condition("nodes.nope.exit_code == 0", &ctx())
            .unwrap_err();
        assert!(matches!(err, TemplateError::UndefinedVariable { .. }));
    }

    #[test]
    fn test_evaluate_value() {
        let engine = TemplateEngine::new();
        assert_eq!(engine.evaluate_value("vars.replicas * 2", &ctx()).unwrap(), json!(6));
        assert_eq!(
            engine.evaluate_value("nodes.test.exit_code", &ctx()).unwrap(),
            json!(0)
        );
    }

    #[test]
    fn test_validate_expression() {
        let engine = TemplateEngine::new();
        assert!(engine.validate_expression("vars.a == 1").is_ok());
        assert!(engine.validate_expression("vars.a ==").is_err());
    }
}
