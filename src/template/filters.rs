//! Custom template filters

use minijinja::value::Value;
use minijinja::{Error, ErrorKind, State};

pub fn register_filters(env: &mut minijinja::Environment) {
    env.add_filter("shell_escape", filter_shell_escape);
    env.add_filter("json", filter_json);
    env.add_filter("default", filter_default);
    env.add_filter("trim", filter_trim);
    env.add_filter("lines", filter_lines);
}

/// Quote a value for safe interpolation into `sh -c` commands.
///
/// Plain words pass through; anything else is single-quoted with embedded
/// quotes rewritten as `'\''`.
fn filter_shell_escape(_state: &State, value: Value) -> Result<Value, Error> {
    let s = value.to_string();
    let plain = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '='));
    if plain {
        return Ok(Value::from(s));
    }

    let mut escaped = String::with_capacity(s.len() + 2);
    escaped.push('\'');
    for c in s.chars() {
        if c == '\'' {
            escaped.push_str("'\\''");
        } else {
            escaped.push(c);
        }
    }
    escaped.push('\'');
    Ok(Value::from(escaped))
}

fn filter_json(_state: &State, value: Value) -> Result<Value, Error> {
    serde_json::to_string(&value).map(Value::from).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("JSON serialization failed: {e}"),
        )
    })
}

/// Fallback for undefined, none or empty-string values
fn filter_default(_state: &State, value: Value, default: Value) -> Result<Value, Error> {
    let missing = value.is_undefined()
        || value.is_none()
        || value.as_str().is_some_and(str::is_empty);
    Ok(if missing { default } else { value })
}

fn filter_trim(_state: &State, value: Value) -> Result<Value, Error> {
    Ok(Value::from(value.to_string().trim()))
}

fn filter_lines(_state: &State, value: Value) -> Result<Value, Error> {
    let s = value.to_string();
    Ok(Value::from_iter(s.lines().map(Value::from)))
}
