use std::path::Path;

use sqlgate::config::load_config_from_str;
use sqlgate::config::model::EngineKind;
use sqlgate::config::templating::{pre_render_vars, render_static};
use sqlgate::config::variables::VariableSet;
use sqlgate::ErrorKind;

#[test]
fn test_default_variable_resolves_database_host() {
    std::env::remove_var("SQLGATE_E6_DB_HOST");
    let yaml = r#"
variables:
  values:
    db_host: ${SQLGATE_E6_DB_HOST:localhost}
databases:
  - name: main
    kind: sqlserver
    host: "{{ vars.db_host }}"
    port: 1433
    user: app
    password: pw
    database: appdb
workflows: []
"#;
    let loaded = load_config_from_str(yaml, Path::new(".")).unwrap();
    let db = &loaded.config.databases[0];
    assert_eq!(db.kind, EngineKind::Sqlserver);
    assert_eq!(db.host.as_deref(), Some("localhost"));
}

#[test]
fn test_runtime_path_in_static_field_fails_naming_offender() {
    let yaml = r#"
databases:
  - name: main
    kind: sqlserver
    host: "{{ trigger.params.h | upper }}"
    port: 1433
    user: app
    password: pw
    database: appdb
workflows: []
"#;
    let err = load_config_from_str(yaml, Path::new(".")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TemplateParse);
    assert!(err.to_string().contains(".trigger.params.h"), "{err}");
}

#[test]
fn test_pre_pass_handles_numeric_scalar() {
    std::env::remove_var("SQLGATE_E6_DB_PORT");
    let yaml = r#"
variables:
  values:
    db_port: ${SQLGATE_E6_DB_PORT:1433}
databases:
  - name: main
    kind: sqlserver
    host: db.internal
    port: {{ vars.db_port }}
    user: app
    password: pw
    database: appdb
workflows: []
"#;
    let loaded = load_config_from_str(yaml, Path::new(".")).unwrap();
    assert_eq!(loaded.config.databases[0].port, Some(1433));
}

#[test]
fn test_pre_pass_only_substitutes_narrow_pattern() {
    let vars = VariableSet::from_pairs([("a", "1")]);
    let raw = "x: {{ vars.a }}\ny: \"{{ vars.a | upper }}\"";
    let out = pre_render_vars(raw, &vars).unwrap();
    assert_eq!(out, "x: 1\ny: \"{{ vars.a | upper }}\"");
}

#[test]
fn test_pre_pass_unknown_variable_fails() {
    let vars = VariableSet::default();
    let err = pre_render_vars("x: {{ vars.mystery }}", &vars).unwrap_err();
    assert!(err.to_string().contains("vars.mystery"));
}

#[test]
fn test_static_render_missing_variable_is_hard_error() {
    let vars = VariableSet::from_pairs([("known", "v")]);
    assert!(render_static("f", "{{ vars.known }}-{{ vars.unknown }}", &vars).is_err());
}

#[test]
fn test_static_render_complex_expression() {
    let vars = VariableSet::from_pairs([("region", "eu")]);
    let out = render_static("f", "srv-{{ vars.region | upper }}", &vars).unwrap();
    assert_eq!(out, "srv-EU");
}

#[test]
fn test_every_dynamic_root_rejected() {
    let vars = VariableSet::from_pairs([("ok", "1")]);
    for root in ["trigger", "steps", "params", "iter", "workflow"] {
        let template = format!("{{{{ {root}.x }}}}");
        let err = render_static("f", &template, &vars).unwrap_err();
        assert!(
            err.to_string().contains(&format!(".{root}.x")),
            "expected rejection of {root}: {err}"
        );
    }
}

#[test]
fn test_parameter_defaults_are_statically_rendered() {
    let yaml = r#"
variables:
  values:
    page_size: "25"
databases:
  - name: db
    kind: sqlite
    path: ":memory:"
workflows:
  - name: list
    triggers:
      - type: http
        path: /list
        params:
          - name: limit
            type: int
            default: "{{ vars.page_size | int }}"
    steps:
      - type: response
        template: ok
"#;
    let loaded = load_config_from_str(yaml, Path::new(".")).unwrap();
    let workflow = &loaded.config.workflows[0];
    let sqlgate::config::model::Trigger::Http { params, .. } = &workflow.triggers[0] else {
        panic!("expected http trigger");
    };
    assert_eq!(params[0].default.as_deref(), Some("25"));
}
