//! Runtime template rendering.
//!
//! Workflow SQL bodies, parameter maps, response bodies and webhook payloads
//! all render through one minijinja environment. Missing leaves evaluate to
//! the empty string so templates can optionally reference
//! e.g. `trigger.headers["x-custom"]`; the load-time resolver in
//! `config::templating` shares the helper library but runs strict.
//!
//! Rendering is pure: queries and webhooks happen in step dispatch, never
//! inside template execution.

use minijinja::value::Value;
use minijinja::{Environment, Error as MjError, ErrorKind as MjErrorKind, UndefinedBehavior};
use serde::Serialize;

use crate::errors::Result;

fn to_json(value: Value) -> std::result::Result<String, MjError> {
    serde_json::to_string(&value)
        .map_err(|e| MjError::new(MjErrorKind::InvalidOperation, e.to_string()))
}

fn to_json_indent(value: Value) -> std::result::Result<String, MjError> {
    serde_json::to_string_pretty(&value)
        .map_err(|e| MjError::new(MjErrorKind::InvalidOperation, e.to_string()))
}

/// Registers the helper function library shared by the static and runtime
/// environments. Every helper is callable as a function; `json` and
/// `json_indent` also work in filter position.
pub fn register_helpers(env: &mut Environment<'_>) {
    env.add_function("add", |a: i64, b: i64| a + b);

    env.add_function("mod", |a: i64, b: i64| -> std::result::Result<i64, MjError> {
        if b == 0 {
            return Err(MjError::new(
                MjErrorKind::InvalidOperation,
                "mod by zero",
            ));
        }
        Ok(a.rem_euclid(b))
    });

    env.add_function("json", to_json);
    env.add_filter("json", to_json);

    env.add_function("json_indent", to_json_indent);
    env.add_filter("json_indent", to_json_indent);
}

/// One-shot renderer over the full runtime context.
#[derive(Debug)]
pub struct Renderer {
    env: Environment<'static>,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        register_helpers(&mut env);
        Self { env }
    }

    /// Renders a template string against a serializable context.
    pub fn render<C: Serialize>(&self, template: &str, context: &C) -> Result<String> {
        // Fast path: nothing to substitute.
        if !template.contains("{{") && !template.contains("{%") {
            return Ok(template.to_string());
        }
        Ok(self
            .env
            .render_str(template, Value::from_serialize(context))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_leaf_renders_empty() {
        let r = Renderer::new();
        let out = r
            .render("[{{ trigger.headers.missing }}]", &json!({"trigger": {}}))
            .unwrap();
        assert_eq!(out, "[]");
    }

    #[test]
    fn test_helper_functions() {
        let r = Renderer::new();
        let out = r.render("{{ add(2, 3) }}-{{ mod(7, 3) }}", &json!({})).unwrap();
        assert_eq!(out, "5-1");
    }

    #[test]
    fn test_json_filter() {
        let r = Renderer::new();
        let out = r
            .render("{{ data | json }}", &json!({"data": {"a": 1}}))
            .unwrap();
        assert_eq!(out, "{\"a\":1}");
    }

    #[test]
    fn test_json_function_call_style() {
        let r = Renderer::new();
        let out = r
            .render("{{ json(data) }}", &json!({"data": {"a": 1}}))
            .unwrap();
        assert_eq!(out, "{\"a\":1}");
    }
}
