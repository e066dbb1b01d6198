//! Templating for declarative workflow nodes
//!
//! Commands and expressions use minijinja syntax against the run context:
//!
//! - `{{ vars.name }}`: initial variables and node outputs by id
//! - `{{ nodes.build.stdout }}`: outputs of completed nodes only
//! - `{{ env.HOME }}`: process environment
//! - locals such as `iteration`, `previous` and `output` inside loops
//! - filters: `shell_escape`, `json`, `trim`, `default`, `lines`

mod conditionals;
mod context;
mod engine;
mod errors;
mod filters;

pub use context::TemplateContext;
pub use engine::TemplateEngine;
pub use errors::{SourceLocation, TemplateError};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_from_upstream_output() {
        let engine = TemplateEngine::new();
        let mut ctx = TemplateContext::new();
        ctx.add_node(
            "fetch",
            json!({"stdout": "release notes.txt\n", "exit_code": 0}),
        );

        let cmd = engine
            .render("wc -l {{ nodes.fetch.stdout | trim | shell_escape }}", &ctx)
            .unwrap();
        assert_eq!(cmd, "wc -l 'release notes.txt'");
        assert!(
            engine
                .evaluate_condition("nodes.fetch.exit_code == 0", &ctx)
                .unwrap()
        );
    }

    #[test]
    fn test_typo_suggestion() {
        let engine = TemplateEngine::new();
        let mut ctx = TemplateContext::new();
        ctx.add_node("analyze", json!("done"));

        let err = engine.render("{{ nodse.analyze }}", &ctx).unwrap_err();
        assert!(matches!(err, TemplateError::UndefinedVariable { .. }));
    }
}
