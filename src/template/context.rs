//! Template context: the run context as seen by command and expression templates

use minijinja::value::{Enumerator, Object, Value};
use std::fmt;
use std::sync::Arc;

use crate::workflow::NodeContext;

type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Values available to templates during rendering.
///
/// `vars` is the whole run context (initial variables plus node outputs),
/// `nodes` holds only completed node outputs and `locals` carries
/// per-evaluation values such as a loop's `iteration`.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub vars: JsonMap,
    pub nodes: JsonMap,
    pub locals: JsonMap,
    pub run_id: Option<String>,
    pub node_id: Option<String>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vars(vars: JsonMap) -> Self {
        Self {
            vars,
            ..Default::default()
        }
    }

    /// Snapshot of what a running node sees
    pub fn from_node(ctx: &NodeContext) -> Self {
        Self {
            vars: (*ctx.vars).clone(),
            nodes: (*ctx.outputs).clone(),
            locals: JsonMap::new(),
            run_id: Some(ctx.run_id.clone()),
            node_id: Some(ctx.node_id.clone()),
        }
    }

    /// Record a completed node's output
    pub fn add_node(&mut self, id: impl Into<String>, output: serde_json::Value) {
        let id = id.into();
        self.vars.insert(id.clone(), output.clone());
        self.nodes.insert(id, output);
    }

    /// Set a top-level local such as `iteration` or `output`
    pub fn set_local(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.locals.insert(name.into(), value);
    }

    pub fn to_value(&self) -> Value {
        Value::from_object(ContextObject(self.clone()))
    }

    /// Top-level names, for error suggestions
    pub fn known_variables(&self) -> Vec<&str> {
        let mut names = vec!["vars", "nodes", "env", "run_id", "node_id"];
        names.extend(self.locals.keys().map(String::as_str));
        names
    }

    /// Node ids and variable names, for error suggestions on nested access
    pub fn known_keys(&self) -> Vec<&str> {
        self.vars
            .keys()
            .chain(self.nodes.keys())
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone)]
struct ContextObject(TemplateContext);

impl fmt::Display for ContextObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TemplateContext")
    }
}

impl Object for ContextObject {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let name = key.as_str()?;
        match name {
            "vars" => Some(Value::from_serialize(&self.0.vars)),
            "nodes" => Some(Value::from_serialize(&self.0.nodes)),
            "env" => Some(Value::from_object(EnvObject)),
            "run_id" => self.0.run_id.as_deref().map(Value::from),
            "node_id" => self.0.node_id.as_deref().map(Value::from),
            _ => self.0.locals.get(name).map(Value::from_serialize),
        }
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        let mut keys: Vec<Value> = ["vars", "nodes", "env", "run_id", "node_id"]
            .into_iter()
            .map(Value::from)
            .collect();
        keys.extend(self.0.locals.keys().map(|k| Value::from(k.as_str())));
        Enumerator::Values(keys)
    }
}

/// Lazy environment variable access
#[derive(Debug, Clone, Copy)]
struct EnvObject;

impl fmt::Display for EnvObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "env")
    }
}

impl Object for EnvObject {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        std::env::var(key.as_str()?).ok().map(Value::from)
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::NonEnumerable
    }
}
