//! Runtime context for one workflow invocation.
//!
//! Templates always see the same six top-level keys (`trigger`, `steps`,
//! `params`, `iter`, `workflow`, `vars`) regardless of which step is
//! rendering. `iter` is null outside block steps.

use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use nanoid::nanoid;
use serde::Serialize;

use crate::config::variables::VariableSet;
use crate::db::{ParamMap, QueryOutcome, Record};

/// The event that started an invocation: an HTTP request or a scheduler tick.
#[derive(Debug, Clone, Default)]
pub struct TriggerEvent {
    pub params: IndexMap<String, serde_json::Value>,
    pub headers: IndexMap<String, String>,
    pub client_ip: String,
    pub path: String,
    pub method: String,
    /// Per-request timeout override, bounded by the server maximum.
    pub timeout_override_sec: Option<u64>,
}

impl TriggerEvent {
    /// Synthetic event for a cron firing. The context key set stays identical
    /// to HTTP triggers; only the values are empty.
    pub fn scheduled(schedule: &str) -> Self {
        Self {
            params: IndexMap::new(),
            headers: IndexMap::new(),
            client_ip: String::new(),
            path: format!("cron:{schedule}"),
            method: "SCHEDULE".to_string(),
            timeout_override_sec: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerContext {
    pub params: ParamMap,
    pub headers: IndexMap<String, String>,
    pub client_ip: String,
    pub path: String,
    pub method: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowInfo {
    pub name: String,
    pub run_id: String,
    pub start_time: String,
}

/// Result of one named step, available to later steps under
/// `steps.<name>`.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub rows: Vec<Record>,
    pub count: usize,
    pub rows_affected: u64,
    pub duration_ms: u64,
    pub success: bool,
}

impl From<QueryOutcome> for StepResult {
    fn from(outcome: QueryOutcome) -> Self {
        Self {
            count: outcome.rows.len(),
            rows: outcome.rows,
            rows_affected: outcome.rows_affected,
            duration_ms: outcome.duration_ms,
            success: true,
        }
    }
}

/// Block-iteration cursor, present only while a block body runs.
#[derive(Debug, Clone, Serialize)]
pub struct IterContext {
    pub index: usize,
    pub value: Record,
}

/// The value workflow templates render against. Append-only within a run:
/// step results accumulate under `steps`, everything else is fixed at
/// creation.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeContext {
    pub trigger: TriggerContext,
    pub steps: IndexMap<String, StepResult>,
    pub params: ParamMap,
    /// Carries the cursor while a block body runs, null otherwise. The key is
    /// always present so the context shape never depends on the current step.
    pub iter: Option<IterContext>,
    pub workflow: WorkflowInfo,
    pub vars: IndexMap<String, String>,
    #[serde(skip)]
    pub timeout_override_sec: Option<u64>,
    /// Most recent query result, named or not; feeds webhook steps that do
    /// not declare a source.
    #[serde(skip)]
    pub last_query: Option<(String, StepResult)>,
}

impl RuntimeContext {
    pub fn new(
        workflow_name: &str,
        event: TriggerEvent,
        params: ParamMap,
        vars: &VariableSet,
    ) -> Self {
        Self {
            trigger: TriggerContext {
                params: params.clone(),
                headers: event.headers,
                client_ip: event.client_ip,
                path: event.path,
                method: event.method,
            },
            steps: IndexMap::new(),
            params,
            iter: None,
            workflow: WorkflowInfo {
                name: workflow_name.to_string(),
                run_id: nanoid!(),
                start_time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            },
            vars: vars.values().clone(),
            timeout_override_sec: event.timeout_override_sec,
            last_query: None,
        }
    }

    /// Publishes a step result. Completed steps are never overwritten from a
    /// cancelled retry; within one sequential run the name is simply bound.
    pub fn bind_step(&mut self, name: &str, result: StepResult) {
        self.steps.insert(name.to_string(), result);
    }
}
