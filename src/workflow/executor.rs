//! Workflow execution.
//!
//! The executor turns a trigger event into a terminal response: it resolves
//! declared parameters, walks the step list in order, binds named results
//! into the runtime context, and enforces the read/write policy and timeout
//! discipline around every query.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::model::{ParamSpec, ParamType, ParamSource, ServerConfig, Step, Workflow};
use crate::config::variables::VariableSet;
use crate::db::manager::DbManager;
use crate::db::session;
use crate::db::statement::is_write;
use crate::db::value::SqlValue;
use crate::db::ParamMap;
use crate::errors::{ErrorEnvelope, GatewayError, Result};
use crate::render::Renderer;
use crate::webhook::{ExecutionContext, WebhookDispatcher};
use crate::workflow::context::{IterContext, RuntimeContext, StepResult, TriggerEvent};

/// Terminal output of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowResponse {
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

pub struct WorkflowExecutor {
    manager: Arc<DbManager>,
    renderer: Renderer,
    dispatcher: WebhookDispatcher,
    vars: VariableSet,
    server: ServerConfig,
}

impl WorkflowExecutor {
    pub fn new(manager: Arc<DbManager>, vars: VariableSet, server: ServerConfig) -> Result<Self> {
        Ok(Self {
            manager,
            renderer: Renderer::new(),
            dispatcher: WebhookDispatcher::new()?,
            vars,
            server,
        })
    }

    /// Runs one invocation to completion. `specs` are the parameter
    /// declarations of the trigger that fired.
    #[instrument(name = "workflow", skip_all, fields(workflow = %workflow.name))]
    pub async fn execute(
        &self,
        workflow: &Workflow,
        specs: &[ParamSpec],
        event: TriggerEvent,
        cancel: CancellationToken,
    ) -> Result<WorkflowResponse> {
        let params = resolve_params(specs, &event)?;
        let mut ctx = RuntimeContext::new(&workflow.name, event, params, &self.vars);

        info!(run_id = %ctx.workflow.run_id, "workflow started");

        let terminal = self.run_steps(&workflow.steps, &mut ctx, &cancel).await?;
        let response = terminal.unwrap_or_else(|| WorkflowResponse {
            status: 200,
            content_type: "application/json".to_string(),
            body: "{}".to_string(),
        });

        info!(run_id = %ctx.workflow.run_id, status = response.status, "workflow finished");
        Ok(response)
    }

    /// Runs one invocation, turning any failure into the error envelope so the
    /// transport layer never sees internal detail.
    pub async fn execute_to_response(
        &self,
        workflow: &Workflow,
        specs: &[ParamSpec],
        event: TriggerEvent,
        cancel: CancellationToken,
    ) -> WorkflowResponse {
        match self.execute(workflow, specs, event, cancel).await {
            Ok(response) => response,
            Err(e) => {
                warn!(workflow = %workflow.name, "workflow failed: {e}");
                let envelope = ErrorEnvelope::from_error(&e);
                WorkflowResponse {
                    status: 500,
                    content_type: "application/json".to_string(),
                    body: serde_json::to_string(&envelope)
                        .unwrap_or_else(|_| "{\"error\":\"internal\"}".to_string()),
                }
            }
        }
    }

    fn run_steps<'a>(
        &'a self,
        steps: &'a [Step],
        ctx: &'a mut RuntimeContext,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Option<WorkflowResponse>>> {
        Box::pin(async move {
            for step in steps {
                match step {
                    Step::Query {
                        name,
                        database,
                        sql,
                        params,
                        session: overrides,
                        timeout_sec,
                    } => {
                        let result = self
                            .run_query(ctx, database, sql, params, overrides.as_ref(), *timeout_sec, cancel)
                            .await?;
                        ctx.last_query = Some((
                            name.clone().unwrap_or_else(|| database.clone()),
                            result.clone(),
                        ));
                        if let Some(name) = name {
                            ctx.bind_step(name, result);
                        }
                    }

                    Step::Response {
                        template,
                        content_type,
                        status,
                    } => {
                        let body = self.renderer.render(template, ctx)?;
                        return Ok(Some(WorkflowResponse {
                            status: *status,
                            content_type: content_type.clone(),
                            body,
                        }));
                    }

                    Step::Webhook {
                        name,
                        source,
                        fatal,
                        webhook,
                    } => {
                        let exec_ctx = self.execution_context(ctx, source.as_deref())?;
                        match self.dispatcher.dispatch(webhook, &exec_ctx, cancel).await {
                            Ok(()) => {}
                            Err(e) if *fatal => return Err(e),
                            Err(e) => {
                                warn!(
                                    step = name.as_deref().unwrap_or("webhook"),
                                    "webhook step failed (non-fatal): {e}"
                                );
                            }
                        }
                    }

                    Step::ForEach { over, steps, .. } => {
                        let rows = ctx
                            .steps
                            .get(over)
                            .map(|r| r.rows.clone())
                            .ok_or_else(|| {
                                GatewayError::WorkflowPolicy(format!(
                                    "for_each references unknown step '{over}'"
                                ))
                            })?;

                        let count = rows.len();
                        for (index, row) in rows.into_iter().enumerate() {
                            ctx.iter = Some(IterContext { index, value: row });
                            let terminal = self.run_steps(steps, ctx, cancel).await;
                            match terminal {
                                Ok(None) => {}
                                other => {
                                    ctx.iter = None;
                                    return other;
                                }
                            }
                        }
                        ctx.iter = None;
                        if count == 0 {
                            info!(step = %over, "for_each over empty result");
                        }
                    }
                }
            }
            Ok(None)
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_query(
        &self,
        ctx: &RuntimeContext,
        database: &str,
        sql: &str,
        step_params: &indexmap::IndexMap<String, serde_json::Value>,
        overrides: Option<&crate::config::model::QuerySessionOverrides>,
        timeout_sec: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<StepResult> {
        let driver = self.manager.get(database).await.ok_or_else(|| {
            GatewayError::WorkflowPolicy(format!("unknown database '{database}'"))
        })?;

        let session = session::resolve(driver.descriptor(), overrides)?;
        let rendered_sql = self.renderer.render(sql, ctx)?;

        // Write rejection happens before the statement ever reaches the engine.
        if driver.read_only() && is_write(&rendered_sql)? {
            return Err(GatewayError::WorkflowPolicy(format!(
                "write statement rejected: database '{database}' is read-only"
            )));
        }

        let params = self.bind_params(ctx, step_params)?;
        let timeout = self.effective_timeout(timeout_sec, ctx.timeout_override_sec);

        let outcome = tokio::time::timeout(
            timeout,
            driver.query(cancel, &session, &rendered_sql, &params),
        )
        .await
        .map_err(|_| {
            GatewayError::Cancelled(format!(
                "query against '{database}' exceeded {}s timeout",
                timeout.as_secs()
            ))
        })??;

        Ok(StepResult::from(outcome))
    }

    /// Effective bind map: resolved trigger parameters overlaid by the step's
    /// own parameter map, each value rendered against the current context.
    fn bind_params(
        &self,
        ctx: &RuntimeContext,
        step_params: &indexmap::IndexMap<String, serde_json::Value>,
    ) -> Result<ParamMap> {
        let mut params = ctx.params.clone();
        for (name, value) in step_params {
            let bound = match value {
                serde_json::Value::String(template) => {
                    SqlValue::Text(self.renderer.render(template, ctx)?)
                }
                other => SqlValue::from_json(other.clone()),
            };
            params.insert(name.clone(), bound);
        }
        Ok(params)
    }

    fn effective_timeout(&self, step: Option<u64>, request: Option<u64>) -> Duration {
        let chosen = step
            .or(request)
            .unwrap_or(self.server.default_timeout_sec)
            .min(self.server.max_timeout_sec)
            .max(1);
        Duration::from_secs(chosen)
    }

    /// Shapes the webhook execution context from a named source step or the
    /// most recent query.
    fn execution_context(
        &self,
        ctx: &RuntimeContext,
        source: Option<&str>,
    ) -> Result<ExecutionContext> {
        let (query, result) = match source {
            Some(name) => {
                let result = ctx.steps.get(name).ok_or_else(|| {
                    GatewayError::WorkflowPolicy(format!(
                        "webhook references unknown step '{name}'"
                    ))
                })?;
                (name.to_string(), result.clone())
            }
            None => match &ctx.last_query {
                Some((name, result)) => (name.clone(), result.clone()),
                None => (
                    ctx.workflow.name.clone(),
                    StepResult {
                        rows: Vec::new(),
                        count: 0,
                        rows_affected: 0,
                        duration_ms: 0,
                        success: true,
                    },
                ),
            },
        };

        Ok(ExecutionContext {
            query,
            count: result.count,
            success: result.success,
            duration_ms: result.duration_ms,
            params: ctx.params.clone(),
            data: result.rows,
            error: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            build_time: option_env!("SQLGATE_BUILD_TIME").unwrap_or("unknown").to_string(),
        })
    }
}

/// Resolves the declared trigger parameters from the event: read from the
/// declared source, coerce by type, fall back to the statically-rendered
/// default. A missing required parameter fails the invocation.
pub fn resolve_params(specs: &[ParamSpec], event: &TriggerEvent) -> Result<ParamMap> {
    let mut params = ParamMap::new();

    for spec in specs {
        let raw = match spec.source {
            ParamSource::Header => event
                .headers
                .get(&spec.name)
                .map(|v| serde_json::Value::String(v.clone())),
            ParamSource::Query | ParamSource::Path | ParamSource::Body => {
                event.params.get(&spec.name).cloned()
            }
        };

        let value = match raw {
            Some(v) => coerce(spec, &v)?,
            None => match &spec.default {
                Some(default) => coerce(spec, &serde_json::Value::String(default.clone()))?,
                None if spec.required => {
                    return Err(GatewayError::WorkflowPolicy(format!(
                        "missing required parameter '{}'",
                        spec.name
                    )));
                }
                None => SqlValue::Null,
            },
        };

        params.insert(spec.name.clone(), value);
    }

    Ok(params)
}

fn coerce(spec: &ParamSpec, raw: &serde_json::Value) -> Result<SqlValue> {
    let type_error = |expected: &str| {
        GatewayError::WorkflowPolicy(format!(
            "parameter '{}': expected {expected}, got {raw}",
            spec.name
        ))
    };

    let value = match spec.param_type {
        ParamType::String => match raw {
            serde_json::Value::String(s) => SqlValue::Text(s.clone()),
            serde_json::Value::Null => SqlValue::Null,
            other => SqlValue::Text(other.to_string()),
        },
        ParamType::Int => match raw {
            serde_json::Value::Number(n) => {
                SqlValue::Int(n.as_i64().ok_or_else(|| type_error("integer"))?)
            }
            serde_json::Value::String(s) => {
                SqlValue::Int(s.trim().parse().map_err(|_| type_error("integer"))?)
            }
            _ => return Err(type_error("integer")),
        },
        ParamType::Float => match raw {
            serde_json::Value::Number(n) => {
                SqlValue::Float(n.as_f64().ok_or_else(|| type_error("float"))?)
            }
            serde_json::Value::String(s) => {
                SqlValue::Float(s.trim().parse().map_err(|_| type_error("float"))?)
            }
            _ => return Err(type_error("float")),
        },
        ParamType::Bool => match raw {
            serde_json::Value::Bool(b) => SqlValue::Bool(*b),
            serde_json::Value::String(s) => match s.trim() {
                "true" | "1" => SqlValue::Bool(true),
                "false" | "0" => SqlValue::Bool(false),
                _ => return Err(type_error("bool")),
            },
            _ => return Err(type_error("bool")),
        },
        ParamType::Json => match raw {
            serde_json::Value::String(s) => {
                SqlValue::Json(serde_json::from_str(s).map_err(|_| type_error("json"))?)
            }
            other => SqlValue::Json(other.clone()),
        },
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, param_type: ParamType, required: bool, default: Option<&str>) -> ParamSpec {
        ParamSpec {
            name: name.to_string(),
            source: ParamSource::Query,
            param_type,
            required,
            default: default.map(str::to_string),
        }
    }

    #[test]
    fn test_missing_required_parameter() {
        let specs = vec![spec("id", ParamType::Int, true, None)];
        let event = TriggerEvent::default();
        let err = resolve_params(&specs, &event).unwrap_err();
        assert!(matches!(err, GatewayError::WorkflowPolicy(_)));
    }

    #[test]
    fn test_default_applies_with_coercion() {
        let specs = vec![spec("limit", ParamType::Int, false, Some("10"))];
        let event = TriggerEvent::default();
        let params = resolve_params(&specs, &event).unwrap();
        assert_eq!(params.get("limit"), Some(&SqlValue::Int(10)));
    }

    #[test]
    fn test_bad_int_rejected() {
        let mut event = TriggerEvent::default();
        event
            .params
            .insert("id".into(), serde_json::json!("abc"));
        let specs = vec![spec("id", ParamType::Int, true, None)];
        assert!(resolve_params(&specs, &event).is_err());
    }
}
