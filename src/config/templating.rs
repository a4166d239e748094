//! Load-time (static) template resolution.
//!
//! A fixed allow-list of scalar configuration fields may carry templates, but
//! only over `vars`: database coordinates must be fully determined at load
//! time, so any reference to a runtime path (`trigger`, `steps`, `params`,
//! `iter`, `workflow`) is rejected before the first request is served.
//! Rendering here is strict: a missing variable is a hard error, unlike the
//! runtime renderer's empty-string leniency.

use minijinja::value::Value;
use minijinja::{Environment, UndefinedBehavior};
use regex::Regex;
use serde::Serialize;

use crate::config::model::{Config, Trigger};
use crate::config::variables::VariableSet;
use crate::errors::{GatewayError, Result};
use crate::render::register_helpers;

/// Context roots that only exist during workflow execution.
const DYNAMIC_ROOTS: [&str; 5] = ["trigger", "steps", "params", "iter", "workflow"];

/// Pre-renders narrow `{{ vars.NAME }}` occurrences against the raw YAML
/// text, before parsing. This lets templates appear inside numeric YAML
/// scalars (e.g. a templated port). Complex expressions are left alone for
/// the static resolver to handle after parsing.
pub fn pre_render_vars(raw: &str, vars: &VariableSet) -> Result<String> {
    let re = Regex::new(r"\{\{\s*vars\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}")?;

    let mut result = String::with_capacity(raw.len());
    let mut last_match = 0;

    for cap in re.captures_iter(raw) {
        let full = cap.get(0).expect("capture 0 always present");
        let name = &cap[1];

        result.push_str(&raw[last_match..full.start()]);

        match vars.get(name) {
            Some(value) => result.push_str(value),
            None => {
                return Err(GatewayError::TemplateStatic(format!(
                    "undefined variable 'vars.{name}' in configuration"
                )))
            }
        }

        last_match = full.end();
    }

    result.push_str(&raw[last_match..]);
    Ok(result)
}

/// Collects every dotted-path reference inside `{{ … }}` / `{% … %}` blocks
/// whose root is one of the runtime-only context keys. Returns the first
/// offender as a dotted path.
fn find_dynamic_reference(template: &str) -> Result<Option<String>> {
    let block_re = Regex::new(r"(?s)\{\{(.*?)\}\}|\{%(.*?)%\}")?;
    let path_re = Regex::new(r"(?:^|[^\w.])(trigger|steps|params|iter|workflow|vars)((?:\.[\w]+)*)")?;

    for block in block_re.captures_iter(template) {
        let content = block
            .get(1)
            .or_else(|| block.get(2))
            .map(|m| m.as_str())
            .unwrap_or("");
        for cap in path_re.captures_iter(content) {
            let root = &cap[1];
            if DYNAMIC_ROOTS.contains(&root) {
                return Ok(Some(format!(".{}{}", root, &cap[2])));
            }
        }
    }

    Ok(None)
}

/// Collects `params.<name>` / `steps.<name>` references inside template
/// expression blocks. Validation cross-checks these against a workflow's
/// declared trigger parameters and previously bound step names.
pub(crate) fn collect_runtime_refs(template: &str) -> Result<Vec<(String, String)>> {
    let mut refs = Vec::new();
    if !template.contains("{{") && !template.contains("{%") {
        return Ok(refs);
    }

    let block_re = Regex::new(r"(?s)\{\{(.*?)\}\}|\{%(.*?)%\}")?;
    let ref_re = Regex::new(r"(?:^|[^\w.])(params|steps)\.([A-Za-z_][A-Za-z0-9_]*)")?;

    for block in block_re.captures_iter(template) {
        let content = block
            .get(1)
            .or_else(|| block.get(2))
            .map(|m| m.as_str())
            .unwrap_or("");
        for cap in ref_re.captures_iter(content) {
            refs.push((cap[1].to_string(), cap[2].to_string()));
        }
    }

    Ok(refs)
}

#[derive(Serialize)]
struct StaticContext<'a> {
    vars: &'a indexmap::IndexMap<String, String>,
}

/// Renders one load-time field.
///
/// Fields without template syntax pass through verbatim. Otherwise the field
/// is checked for runtime-path references, then rendered against `{ vars }`
/// with strict undefined behavior.
pub fn render_static(field: &str, template: &str, vars: &VariableSet) -> Result<String> {
    if !template.contains("{{") && !template.contains("{%") {
        return Ok(template.to_string());
    }

    if let Some(path) = find_dynamic_reference(template)? {
        return Err(GatewayError::TemplateStatic(format!(
            "field '{field}' references runtime path '{path}'; only 'vars' is available at load time"
        )));
    }

    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    register_helpers(&mut env);

    let context = StaticContext {
        vars: vars.values(),
    };
    env.render_str(template, Value::from_serialize(&context))
        .map_err(|e| {
            GatewayError::TemplateStatic(format!("field '{field}': {e}"))
        })
}

/// Walks the allow-list of statically-resolvable fields and renders each in
/// place: database coordinates, the public-ID secret key and trigger
/// parameter defaults.
pub fn resolve_static_fields(config: &mut Config, vars: &VariableSet) -> Result<()> {
    for db in &mut config.databases {
        let name = db.name.clone();
        for (label, field) in [
            ("host", &mut db.host),
            ("user", &mut db.user),
            ("password", &mut db.password),
            ("database", &mut db.database),
            ("path", &mut db.path),
        ] {
            if let Some(value) = field {
                *value = render_static(&format!("databases.{name}.{label}"), value, vars)?;
            }
        }
    }

    if let Some(public_ids) = &mut config.public_ids {
        public_ids.secret_key =
            render_static("public_ids.secret_key", &public_ids.secret_key, vars)?;
    }

    for workflow in &mut config.workflows {
        for trigger in &mut workflow.triggers {
            let params = match trigger {
                Trigger::Http { params, .. } => params,
                Trigger::Cron { params, .. } => params,
            };
            for spec in params {
                if let Some(default) = &mut spec.default {
                    *default = render_static(
                        &format!("workflows.{}.params.{}.default", workflow.name, spec.name),
                        default,
                        vars,
                    )?;
                }
            }
        }
    }

    Ok(())
}
