//! Configuration loading.
//!
//! Load order for a document: read the file, pre-parse the `variables`
//! section, snapshot the env file, import referenced process env names,
//! expand `${NAME}` / `${NAME:default}` in the inline values, pre-render
//! `{{ vars.NAME }}` against the raw text, parse the full document, render
//! the statically-resolvable fields and validate. Any step failure aborts
//! the load.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::config::model::{Config, DatabaseDescriptor, EngineKind, Step, Trigger, Workflow};
use crate::config::templating::{collect_runtime_refs, pre_render_vars, resolve_static_fields};
use crate::config::variables::{resolve_variables, VariableSet};
use crate::db::session;
use crate::db::statement::scan_params;
use crate::errors::{GatewayError, Result};

pub mod model;
pub mod templating;
pub mod variables;

/// A parsed, resolved and validated configuration plus the variable snapshot
/// that resolved it.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub vars: VariableSet,
}

#[derive(Debug, Default, Deserialize)]
struct VariablesPreParse {
    #[serde(default)]
    variables: model::VariablesConfig,
}

/// Loads a configuration document from a YAML file.
pub fn load_config_from_path(path: impl AsRef<Path>) -> Result<LoadedConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| {
        GatewayError::ConfigLoad(format!("cannot read {}: {e}", path.display()))
    })?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    load_config_from_str(&raw, base_dir)
}

/// Pulls the top-level `variables:` block out of the raw text. The rest of
/// the document may not be valid YAML yet (templates can sit in numeric
/// scalars until the pre-render pass), so the full parse has to wait.
fn extract_variables_block(raw: &str) -> String {
    let mut block = String::new();
    let mut in_block = false;

    for line in raw.lines() {
        if in_block {
            let top_level = !line.is_empty()
                && !line.starts_with(' ')
                && !line.starts_with('\t')
                && !line.starts_with('#');
            if top_level {
                break;
            }
            block.push_str(line);
            block.push('\n');
        } else if line.starts_with("variables:") {
            block.push_str(line);
            block.push('\n');
            in_block = true;
        }
    }

    block
}

/// Loads a configuration document from its raw YAML text. `base_dir` anchors
/// relative env-file paths.
pub fn load_config_from_str(raw: &str, base_dir: &Path) -> Result<LoadedConfig> {
    let variables_block = extract_variables_block(raw);
    let pre: VariablesPreParse = if variables_block.is_empty() {
        VariablesPreParse::default()
    } else {
        serde_yaml::from_str(&variables_block)?
    };
    let vars = resolve_variables(&pre.variables, base_dir)?;
    debug!(count = vars.values().len(), "variables resolved");

    let pre_rendered = pre_render_vars(raw, &vars)?;
    let mut config: Config = serde_yaml::from_str(&pre_rendered)?;

    resolve_static_fields(&mut config, &vars)?;
    validate(&config)?;

    Ok(LoadedConfig { config, vars })
}

/// Cross-checks the resolved document. Failures are collected so the operator
/// sees every problem in one pass.
pub fn validate(config: &Config) -> Result<()> {
    let mut errors: Vec<String> = Vec::new();

    let mut db_names: Vec<&str> = Vec::new();
    for db in &config.databases {
        if db_names.contains(&db.name.as_str()) {
            errors.push(format!("database '{}': duplicate name", db.name));
        }
        db_names.push(&db.name);
        validate_descriptor(db, &mut errors);
    }

    let mut workflow_names: Vec<&str> = Vec::new();
    for workflow in &config.workflows {
        if workflow_names.contains(&workflow.name.as_str()) {
            errors.push(format!("workflow '{}': duplicate name", workflow.name));
        }
        workflow_names.push(&workflow.name);
        validate_workflow(workflow, config, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(GatewayError::ConfigValidate(errors))
    }
}

fn validate_descriptor(db: &DatabaseDescriptor, errors: &mut Vec<String>) {
    if db.name.is_empty() {
        errors.push("database with empty name".to_string());
    }

    match db.kind {
        EngineKind::Sqlite => {
            if db.path.as_deref().unwrap_or("").is_empty() {
                errors.push(format!("database '{}': sqlite requires a path", db.name));
            }
            if let Some(journal) = db.journal_mode.as_deref() {
                if let Err(e) = crate::db::sqlite::parse_journal_mode(journal) {
                    errors.push(format!("database '{}': {e}", db.name));
                }
            }
        }
        EngineKind::Sqlserver => {
            for (label, present) in [
                ("host", db.host.as_deref().map_or(false, |s| !s.is_empty())),
                ("port", db.port.is_some()),
                ("user", db.user.as_deref().map_or(false, |s| !s.is_empty())),
                (
                    "password",
                    db.password.as_deref().map_or(false, |s| !s.is_empty()),
                ),
                (
                    "database",
                    db.database.as_deref().map_or(false, |s| !s.is_empty()),
                ),
            ] {
                if !present {
                    errors.push(format!("database '{}': sqlserver requires {label}", db.name));
                }
            }
        }
    }

    if let Err(e) = session::resolve(db, None) {
        errors.push(format!("database '{}': {e}", db.name));
    }
}

fn validate_workflow(workflow: &Workflow, config: &Config, errors: &mut Vec<String>) {
    if workflow.triggers.is_empty() {
        errors.push(format!("workflow '{}': no triggers", workflow.name));
    }
    for trigger in &workflow.triggers {
        if let Trigger::Cron { schedule, .. } = trigger {
            if schedule.is_empty() {
                errors.push(format!("workflow '{}': empty cron schedule", workflow.name));
            }
        }
    }
    if workflow.steps.is_empty() {
        errors.push(format!("workflow '{}': no steps", workflow.name));
    }

    let declared: Vec<String> = workflow
        .triggers
        .iter()
        .flat_map(|trigger| {
            let (Trigger::Http { params, .. } | Trigger::Cron { params, .. }) = trigger;
            params.iter().map(|p| p.name.clone())
        })
        .collect();

    let mut bound: Vec<String> = Vec::new();
    validate_steps(
        &workflow.name,
        &workflow.steps,
        config,
        &declared,
        &mut bound,
        errors,
    );
}

/// Walks the step list in declaration order, tracking which step names are
/// bound so far. Every `@name` bind must come from a trigger parameter or the
/// step's own parameter map; every `params.*` / `steps.*` template reference
/// must resolve to a declared parameter or an earlier bound step.
fn validate_steps(
    workflow: &str,
    steps: &[Step],
    config: &Config,
    declared: &[String],
    bound: &mut Vec<String>,
    errors: &mut Vec<String>,
) {
    for step in steps {
        match step {
            Step::Query {
                name,
                database,
                sql,
                params,
                session: overrides,
                ..
            } => {
                match config.databases.iter().find(|d| &d.name == database) {
                    None => errors.push(format!(
                        "workflow '{workflow}': unknown database '{database}'"
                    )),
                    Some(db) => {
                        if let Err(e) = session::resolve(db, overrides.as_ref()) {
                            errors.push(format!("workflow '{workflow}': {e}"));
                        }
                    }
                }

                match scan_params(sql) {
                    Ok(binds) => {
                        for bind in binds {
                            if !declared.contains(&bind) && !params.contains_key(&bind) {
                                errors.push(format!(
                                    "workflow '{workflow}': query references undeclared parameter '@{bind}'"
                                ));
                            }
                        }
                    }
                    Err(e) => errors.push(format!("workflow '{workflow}': {e}")),
                }

                check_template_refs(workflow, sql, declared, bound, errors);
                for value in params.values() {
                    if let serde_json::Value::String(template) = value {
                        check_template_refs(workflow, template, declared, bound, errors);
                    }
                }

                if let Some(name) = name {
                    bound.push(name.clone());
                }
            }
            Step::Response { template, .. } => {
                check_template_refs(workflow, template, declared, bound, errors);
            }
            Step::Webhook { source, webhook, .. } => {
                if webhook.url.is_empty() {
                    errors.push(format!("workflow '{workflow}': webhook with empty url"));
                }
                if let Some(source) = source {
                    if !bound.contains(source) {
                        errors.push(format!(
                            "workflow '{workflow}': webhook source references unbound step '{source}'"
                        ));
                    }
                }
            }
            Step::ForEach { over, steps, .. } => {
                if !bound.contains(over) {
                    errors.push(format!(
                        "workflow '{workflow}': for_each references unbound step '{over}'"
                    ));
                }
                validate_steps(workflow, steps, config, declared, bound, errors);
            }
        }
    }
}

fn check_template_refs(
    workflow: &str,
    template: &str,
    declared: &[String],
    bound: &[String],
    errors: &mut Vec<String>,
) {
    let refs = match collect_runtime_refs(template) {
        Ok(refs) => refs,
        Err(e) => {
            errors.push(format!("workflow '{workflow}': {e}"));
            return;
        }
    };

    for (root, name) in refs {
        match root.as_str() {
            "params" if !declared.contains(&name) => errors.push(format!(
                "workflow '{workflow}': template references undeclared parameter 'params.{name}'"
            )),
            "steps" if !bound.contains(&name) => errors.push(format!(
                "workflow '{workflow}': template references step '{name}' before it is bound"
            )),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variables_block_extraction() {
        let yaml = "server:\n  default_timeout_sec: 5\nvariables:\n  values:\n    a: \"1\"\ndatabases: []\n";
        let block = extract_variables_block(yaml);
        assert!(block.contains("a: \"1\""));
        assert!(!block.contains("databases"));
        assert!(!block.contains("server"));
    }

    #[test]
    fn test_unknown_database_collected() {
        let yaml = r#"
databases:
  - name: db
    kind: sqlite
    path: ":memory:"
workflows:
  - name: w
    triggers:
      - type: http
        path: /t
    steps:
      - type: query
        database: nope
        sql: SELECT 1
"#;
        let err = load_config_from_str(yaml, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("unknown database 'nope'"));
    }

    #[test]
    fn test_undeclared_parameter_reference_rejected() {
        let yaml = r#"
databases:
  - name: db
    kind: sqlite
    path: ":memory:"
workflows:
  - name: w
    triggers:
      - type: http
        path: /w
    steps:
      - type: query
        database: db
        sql: SELECT * FROM t WHERE id = @id
      - type: response
        template: ok
"#;
        let err = load_config_from_str(yaml, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("undeclared parameter '@id'"), "{err}");
    }

    #[test]
    fn test_declared_and_step_parameters_accepted() {
        let yaml = r#"
databases:
  - name: db
    kind: sqlite
    path: ":memory:"
workflows:
  - name: w
    triggers:
      - type: http
        path: /w
        params:
          - name: id
            type: int
    steps:
      - type: query
        name: q
        database: db
        sql: SELECT * FROM t WHERE id = @id AND page = @page
        params:
          page: 1
      - type: response
        template: '{{ steps.q.count }} for {{ params.id }}'
"#;
        assert!(load_config_from_str(yaml, Path::new(".")).is_ok());
    }

    #[test]
    fn test_step_reference_before_binding_rejected() {
        let yaml = r#"
databases:
  - name: db
    kind: sqlite
    path: ":memory:"
workflows:
  - name: w
    triggers:
      - type: http
        path: /w
    steps:
      - type: response
        template: '{{ steps.q.count }}'
"#;
        let err = load_config_from_str(yaml, Path::new(".")).unwrap_err();
        assert!(
            err.to_string()
                .contains("references step 'q' before it is bound"),
            "{err}"
        );
    }

    #[test]
    fn test_multiple_errors_reported_together() {
        let yaml = r#"
databases:
  - name: a
    kind: sqlite
  - name: b
    kind: sqlserver
workflows: []
"#;
        let err = load_config_from_str(yaml, Path::new(".")).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("sqlite requires a path"));
        assert!(text.contains("sqlserver requires host"));
    }
}
