//! Webhook dispatch.
//!
//! Builds a payload from an execution context and delivers it through a
//! shared HTTP client with exponential-backoff retry. Workflow webhook steps
//! and scheduled queries both come through here.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::config::model::{OnEmpty, RetryPolicy, WebhookBody, WebhookDescriptor};
use crate::config::variables::expand_process_env;
use crate::db::{ParamMap, Record};
use crate::errors::{GatewayError, Result};
use crate::render::Renderer;

/// Maximum bytes of an error response body kept for context.
const ERROR_BODY_CAP: usize = 4096;

/// The context webhook templates render against, serialized as the gateway's
/// query-result JSON shape when no body configuration is given.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    pub query: String,
    pub count: usize,
    pub success: bool,
    pub duration_ms: u64,
    pub params: ParamMap,
    pub data: Vec<Record>,
    pub error: Option<String>,
    pub version: String,
    pub build_time: String,
}

pub struct WebhookDispatcher {
    client: reqwest::Client,
    renderer: Renderer,
}

impl WebhookDispatcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            renderer: Renderer::new(),
        })
    }

    /// Builds and delivers one webhook. Build failures are terminal; delivery
    /// failures go through the retry policy.
    pub async fn dispatch(
        &self,
        webhook: &WebhookDescriptor,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if context.count == 0 {
            let on_empty = webhook
                .body
                .as_ref()
                .map(|b| b.on_empty)
                .unwrap_or_default();
            if on_empty == OnEmpty::Skip {
                debug!(query = %context.query, "webhook skipped: empty result");
                return Ok(());
            }
        }

        let url = self
            .renderer
            .render(&webhook.url, context)
            .map_err(|e| GatewayError::WebhookBuild(format!("url template: {e}")))?;
        let url = Url::parse(&url)
            .map_err(|e| GatewayError::WebhookBuild(format!("url '{url}': {e}")))?;

        let method = Method::from_bytes(webhook.method.as_bytes())
            .map_err(|e| GatewayError::WebhookBuild(format!("method '{}': {e}", webhook.method)))?;

        let body = self.build_body(webhook, context)?;
        let headers = build_headers(webhook)?;

        self.deliver(method, url, headers, body, &webhook.retry, cancel)
            .await
    }

    fn build_body(&self, webhook: &WebhookDescriptor, context: &ExecutionContext) -> Result<String> {
        let render = |template: &str| -> Result<String> {
            self.renderer
                .render(template, context)
                .map_err(|e| GatewayError::WebhookBuild(format!("body template: {e}")))
        };

        let Some(body) = &webhook.body else {
            return Ok(serde_json::to_string(context)?);
        };

        if context.count == 0 {
            if let Some(empty) = &body.empty {
                return render(empty);
            }
        }

        if let Some(raw) = &body.raw {
            return render(raw);
        }

        if body.item.is_some() || body.header.is_some() || body.footer.is_some() {
            return self.build_itemized_body(body, context);
        }

        Ok(serde_json::to_string(context)?)
    }

    /// Header, one item per row (rendered against the row extended with
    /// `_index` / `_count`), footer.
    fn build_itemized_body(&self, body: &WebhookBody, context: &ExecutionContext) -> Result<String> {
        let render_part = |template: &str, ctx: &serde_json::Value| -> Result<String> {
            self.renderer
                .render(template, ctx)
                .map_err(|e| GatewayError::WebhookBuild(format!("body template: {e}")))
        };

        let context_json = serde_json::to_value(context)?;
        let mut out = String::new();

        if let Some(header) = &body.header {
            out.push_str(&render_part(header, &context_json)?);
        }

        if let Some(item) = &body.item {
            let mut rendered_items = Vec::with_capacity(context.data.len());
            for (index, row) in context.data.iter().enumerate() {
                let mut item_ctx = serde_json::to_value(row)?;
                if let serde_json::Value::Object(map) = &mut item_ctx {
                    map.insert("_index".to_string(), serde_json::json!(index));
                    map.insert("_count".to_string(), serde_json::json!(context.count));
                }
                rendered_items.push(render_part(item, &item_ctx)?);
            }
            out.push_str(&rendered_items.join(&body.separator));
        }

        if let Some(footer) = &body.footer {
            out.push_str(&render_part(footer, &context_json)?);
        }

        Ok(out)
    }

    /// Sends with exponential backoff. At most `1 + max_attempts` sends; 4xx
    /// is terminal, 5xx and transport errors retry while the policy allows.
    async fn deliver(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: String,
        retry: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut attempt: u32 = 1;
        let mut backoff = Duration::from_millis(retry.initial_backoff_ms);
        let max_backoff = Duration::from_millis(retry.max_backoff_ms);

        loop {
            let request = self
                .client
                .request(method.clone(), url.clone())
                .headers(headers.clone())
                .body(body.clone());

            let outcome = match request.send().await {
                Err(e) => Err(GatewayError::WebhookTransport(e.to_string())),
                Ok(response) => {
                    let status = response.status().as_u16();
                    if status < 400 {
                        drain_body(response).await;
                        Ok(())
                    } else {
                        Err(GatewayError::WebhookStatus {
                            status,
                            body: read_capped_body(response).await,
                        })
                    }
                }
            };

            let err = match outcome {
                Ok(()) => {
                    debug!(%url, attempt, "webhook delivered");
                    return Ok(());
                }
                Err(e) => e,
            };

            if !retry.enabled || !err.is_retryable() || attempt >= 1 + retry.max_attempts {
                return Err(err);
            }

            let wait = backoff.min(max_backoff);
            warn!(%url, attempt, "webhook attempt failed, retrying in {wait:?}: {err}");

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(GatewayError::Cancelled(format!(
                        "webhook cancelled during backoff after {attempt} attempt(s)"
                    )));
                }
                _ = tokio::time::sleep(wait) => {}
            }

            backoff = backoff.saturating_mul(2);
            attempt += 1;
        }
    }
}

fn build_headers(webhook: &WebhookDescriptor) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    for (name, value) in &webhook.headers {
        let expanded = expand_process_env(value)
            .map_err(|e| GatewayError::WebhookBuild(format!("header '{name}': {e}")))?;
        headers.insert(
            HeaderName::from_bytes(name.as_bytes())?,
            HeaderValue::from_str(&expanded)?,
        );
    }

    Ok(headers)
}

/// Reads up to 4 KiB for error context, then drains the remainder so the
/// connection returns to the pool reusable.
async fn read_capped_body(mut response: reqwest::Response) -> String {
    let mut collected: Vec<u8> = Vec::new();
    while let Ok(Some(chunk)) = response.chunk().await {
        if collected.len() < ERROR_BODY_CAP {
            let take = (ERROR_BODY_CAP - collected.len()).min(chunk.len());
            collected.extend_from_slice(&chunk[..take]);
        }
    }
    String::from_utf8_lossy(&collected).into_owned()
}

async fn drain_body(mut response: reqwest::Response) {
    while let Ok(Some(_)) = response.chunk().await {}
}
