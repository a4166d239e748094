use std::path::Path;
use std::sync::Arc;

use sqlgate::config::load_config_from_str;
use sqlgate::config::model::{ParamSpec, Trigger, Workflow};
use sqlgate::db::manager::DbManager;
use sqlgate::workflow::{TriggerEvent, WorkflowExecutor};
use sqlgate::{ErrorKind, GatewayError};
use tokio_util::sync::CancellationToken;

async fn executor_for(yaml: &str) -> (WorkflowExecutor, Vec<Workflow>) {
    let loaded = load_config_from_str(yaml, Path::new(".")).unwrap();
    let manager = Arc::new(DbManager::connect(&loaded.config.databases).await.unwrap());
    let executor = WorkflowExecutor::new(
        manager,
        loaded.vars.clone(),
        loaded.config.server.clone(),
    )
    .unwrap();
    (executor, loaded.config.workflows)
}

fn http_specs(workflow: &Workflow) -> Vec<ParamSpec> {
    workflow
        .triggers
        .iter()
        .find_map(|t| match t {
            Trigger::Http { params, .. } => Some(params.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

fn http_event(path: &str) -> TriggerEvent {
    TriggerEvent {
        params: Default::default(),
        headers: Default::default(),
        client_ip: "127.0.0.1".into(),
        path: path.into(),
        method: "GET".into(),
        timeout_override_sec: None,
    }
}

#[tokio::test]
async fn test_select_renders_response() {
    let yaml = r#"
databases:
  - name: db
    kind: sqlite
    path: ":memory:"
    read_only: false
workflows:
  - name: t
    triggers:
      - type: http
        path: /t
    steps:
      - type: query
        name: q
        database: db
        sql: SELECT 1 AS n
      - type: response
        template: '{"n": {{ steps.q.rows[0].n }}}'
"#;
    let (executor, workflows) = executor_for(yaml).await;
    let workflow = &workflows[0];

    let response = executor
        .execute(
            workflow,
            &http_specs(workflow),
            http_event("/t"),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.content_type, "application/json");
    let body: serde_json::Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(body, serde_json::json!({"n": 1}));
}

#[tokio::test]
async fn test_insert_reports_affected_rows() {
    let yaml = r#"
databases:
  - name: db
    kind: sqlite
    path: ":memory:"
    read_only: false
workflows:
  - name: ins
    triggers:
      - type: http
        path: /ins
        method: POST
    steps:
      - type: query
        name: setup
        database: db
        sql: CREATE TABLE t (x INTEGER)
      - type: query
        name: ins
        database: db
        sql: INSERT INTO t VALUES (@v)
        params:
          v: 42
      - type: response
        template: '{"affected": {{ steps.ins.rows_affected }}, "rows": {{ steps.ins.count }}}'
"#;
    let (executor, workflows) = executor_for(yaml).await;
    let workflow = &workflows[0];

    let response = executor
        .execute(
            workflow,
            &http_specs(workflow),
            http_event("/ins"),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let body: serde_json::Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(body, serde_json::json!({"affected": 1, "rows": 0}));
}

#[tokio::test]
async fn test_write_on_read_only_database_rejected() {
    let yaml = r#"
databases:
  - name: db
    kind: sqlite
    path: ":memory:"
    read_only: true
workflows:
  - name: del
    triggers:
      - type: http
        path: /del
    steps:
      - type: query
        database: db
        sql: DELETE FROM t
      - type: response
        template: never
"#;
    let (executor, workflows) = executor_for(yaml).await;
    let workflow = &workflows[0];

    let err = executor
        .execute(
            workflow,
            &http_specs(workflow),
            http_event("/del"),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WorkflowPolicy);
    assert!(matches!(err, GatewayError::WorkflowPolicy(_)));
}

#[tokio::test]
async fn test_unknown_database_is_policy_error() {
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
        sql: SELECT 1
      - type: response
        template: ok
"#;
    let (executor, mut workflows) = executor_for(yaml).await;
    // Point the step at a database that was never configured. Config
    // validation would normally reject this; the executor must still hold the
    // policy line on its own.
    let workflow = &mut workflows[0];
    if let sqlgate::config::model::Step::Query { database, .. } = &mut workflow.steps[0] {
        *database = "ghost".to_string();
    }

    let err = executor
        .execute(
            workflow,
            &http_specs(workflow),
            http_event("/w"),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WorkflowPolicy);
}

#[tokio::test]
async fn test_trigger_params_bind_into_sql() {
    let yaml = r#"
databases:
  - name: db
    kind: sqlite
    path: ":memory:"
    read_only: false
workflows:
  - name: echo
    triggers:
      - type: http
        path: /echo
        params:
          - name: v
            type: int
            required: true
          - name: missing
    steps:
      - type: query
        name: q
        database: db
        sql: SELECT @v AS v, COALESCE(@missing, 'absent') AS m
      - type: response
        template: '{"v": {{ steps.q.rows[0].v }}, "m": "{{ steps.q.rows[0].m }}"}'
"#;
    let (executor, workflows) = executor_for(yaml).await;
    let workflow = &workflows[0];

    let mut event = http_event("/echo");
    event.params.insert("v".into(), serde_json::json!("7"));

    let response = executor
        .execute(
            workflow,
            &http_specs(workflow),
            event,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let body: serde_json::Value = serde_json::from_str(&response.body).unwrap();
    // Unbound @missing reaches the engine as SQL NULL.
    assert_eq!(body, serde_json::json!({"v": 7, "m": "absent"}));
}

#[tokio::test]
async fn test_for_each_runs_body_per_row() {
    let yaml = r#"
databases:
  - name: db
    kind: sqlite
    path: ":memory:"
    read_only: false
workflows:
  - name: fan
    triggers:
      - type: http
        path: /fan
    steps:
      - type: query
        name: setup
        database: db
        sql: CREATE TABLE sink (v TEXT)
      - type: query
        name: src
        database: db
        sql: SELECT 1 AS v UNION ALL SELECT 2
      - type: for_each
        over: src
        steps:
          - type: query
            database: db
            sql: INSERT INTO sink VALUES (@v)
            params:
              v: "{{ iter.index }}:{{ iter.value.v }}"
      - type: query
        name: check
        database: db
        sql: SELECT COUNT(*) AS c, MIN(v) AS first FROM sink
      - type: response
        template: '{"c": {{ steps.check.rows[0].c }}, "first": "{{ steps.check.rows[0].first }}"}'
"#;
    let (executor, workflows) = executor_for(yaml).await;
    let workflow = &workflows[0];

    let response = executor
        .execute(
            workflow,
            &http_specs(workflow),
            http_event("/fan"),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let body: serde_json::Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(body, serde_json::json!({"c": 2, "first": "0:1"}));
}

#[tokio::test]
async fn test_missing_response_step_yields_empty_envelope() {
    let yaml = r#"
databases:
  - name: db
    kind: sqlite
    path: ":memory:"
    read_only: false
workflows:
  - name: quiet
    triggers:
      - type: http
        path: /quiet
    steps:
      - type: query
        database: db
        sql: SELECT 1 AS n
"#;
    let (executor, workflows) = executor_for(yaml).await;
    let workflow = &workflows[0];

    let response = executor
        .execute(
            workflow,
            &http_specs(workflow),
            http_event("/quiet"),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body, "{}");
}

#[tokio::test]
async fn test_webhook_step_failure_is_non_fatal_by_default() {
    let yaml = r#"
databases:
  - name: db
    kind: sqlite
    path: ":memory:"
    read_only: false
workflows:
  - name: notify
    triggers:
      - type: http
        path: /notify
    steps:
      - type: query
        name: q
        database: db
        sql: SELECT 1 AS n
      - type: webhook
        source: q
        webhook:
          url: "http://127.0.0.1:9/hook"
          retry:
            enabled: false
      - type: response
        template: done
"#;
    let (executor, workflows) = executor_for(yaml).await;
    let workflow = &workflows[0];

    // Port 9 refuses connections; the step fails but the workflow finishes.
    let response = executor
        .execute(
            workflow,
            &http_specs(workflow),
            http_event("/notify"),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body, "done");
}

#[tokio::test]
async fn test_fatal_webhook_step_aborts_workflow() {
    let yaml = r#"
databases:
  - name: db
    kind: sqlite
    path: ":memory:"
    read_only: false
workflows:
  - name: notify
    triggers:
      - type: http
        path: /notify
    steps:
      - type: query
        name: q
        database: db
        sql: SELECT 1 AS n
      - type: webhook
        source: q
        fatal: true
        webhook:
          url: "http://127.0.0.1:9/hook"
          retry:
            enabled: false
      - type: response
        template: never
"#;
    let (executor, workflows) = executor_for(yaml).await;
    let workflow = &workflows[0];

    let err = executor
        .execute(
            workflow,
            &http_specs(workflow),
            http_event("/notify"),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WebhookTransport);
}

#[tokio::test]
async fn test_error_envelope_hides_detail() {
    let yaml = r#"
databases:
  - name: db
    kind: sqlite
    path: ":memory:"
workflows:
  - name: del
    triggers:
      - type: http
        path: /del
    steps:
      - type: query
        database: db
        sql: DROP TABLE t
      - type: response
        template: never
"#;
    let (executor, workflows) = executor_for(yaml).await;
    let workflow = &workflows[0];

    let response = executor
        .execute_to_response(
            workflow,
            &http_specs(workflow),
            http_event("/del"),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(response.status, 500);
    let body: serde_json::Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(body["error"], "workflow_policy");
}
