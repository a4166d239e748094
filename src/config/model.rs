//! Configuration document model.
//!
//! The YAML file declares databases, workflows, variables and logging; this
//! module is the serde shape those sections deserialize into. Load-time
//! resolution (variables, static templates) and validation live in the
//! sibling modules.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Sqlserver,
    Sqlite,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Sqlserver => "sqlserver",
            EngineKind::Sqlite => "sqlite",
        }
    }
}

fn default_true() -> bool {
    true
}

/// Connection pool caps for one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_open: u32,
    pub max_idle: u32,
    pub max_lifetime_sec: u64,
    pub max_idle_time_sec: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open: 5,
            max_idle: 2,
            max_lifetime_sec: 300,
            max_idle_time_sec: 120,
        }
    }
}

/// Static description of one named database.
///
/// The `sqlite` kind requires `path`; the `sqlserver` kind requires host,
/// port, user, password and database. Validation enforces this after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseDescriptor {
    pub name: String,
    pub kind: EngineKind,
    #[serde(default = "default_true")]
    pub read_only: bool,

    // SQL Server coordinates
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    /// Encryption mode: `disable`, `true` or `false`.
    pub encrypt: Option<String>,

    // SQLite coordinates
    /// File path or `:memory:`.
    pub path: Option<String>,

    // Session tuning defaults, overridable per query
    pub isolation: Option<String>,
    pub lock_timeout_ms: Option<u64>,
    pub deadlock_priority: Option<String>,
    pub busy_timeout_ms: Option<u64>,
    pub journal_mode: Option<String>,

    #[serde(default)]
    pub pool: PoolConfig,
}

impl Default for DatabaseDescriptor {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: EngineKind::Sqlite,
            read_only: true,
            host: None,
            port: None,
            user: None,
            password: None,
            database: None,
            encrypt: None,
            path: None,
            isolation: None,
            lock_timeout_ms: None,
            deadlock_priority: None,
            busy_timeout_ms: None,
            journal_mode: None,
            pool: PoolConfig::default(),
        }
    }
}

/// Per-query session overrides carried by a query step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySessionOverrides {
    pub isolation: Option<String>,
    pub lock_timeout_ms: Option<u64>,
    pub deadlock_priority: Option<String>,
    pub busy_timeout_ms: Option<u64>,
    pub journal_mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub default_timeout_sec: u64,
    pub max_timeout_sec: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_timeout_sec: 30,
            max_timeout_sec: 300,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub json: bool,
}

/// The `variables` section: an optional env file plus inline values subject
/// to `${NAME}` / `${NAME:default}` expansion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariablesConfig {
    pub env_file: Option<String>,
    pub values: IndexMap<String, String>,
}

/// Public-ID namespace configuration. Carried in the document model; the
/// encoder itself is an external collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublicIdsConfig {
    pub secret_key: String,
    pub namespaces: Vec<String>,
}

/// Where a trigger parameter is read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamSource {
    #[default]
    Query,
    Path,
    Body,
    Header,
}

/// Type coercion applied to a trigger parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    #[default]
    String,
    Int,
    Float,
    Bool,
    Json,
}

/// Declaration of one trigger parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default)]
    pub source: ParamSource,
    #[serde(rename = "type", default)]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    /// Fallback value; statically rendered at load time, so it may reference
    /// `vars` but never runtime paths.
    pub default: Option<String>,
}

fn default_http_method() -> String {
    "GET".to_string()
}

/// A workflow entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Trigger {
    Http {
        path: String,
        #[serde(default = "default_http_method")]
        method: String,
        #[serde(default)]
        params: Vec<ParamSpec>,
    },
    Cron {
        schedule: String,
        #[serde(default)]
        params: Vec<ParamSpec>,
    },
}

fn default_separator() -> String {
    ",".to_string()
}

/// Policy for a webhook whose execution context carries zero rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnEmpty {
    #[default]
    Send,
    Skip,
}

/// Webhook payload construction. Exactly one of `raw` or the
/// header/item/footer triple is meaningful; with neither, the execution
/// context is JSON-encoded as the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookBody {
    pub raw: Option<String>,
    pub header: Option<String>,
    pub item: Option<String>,
    pub footer: Option<String>,
    #[serde(default = "default_separator")]
    pub separator: String,
    /// Alternate template rendered when the row count is zero.
    pub empty: Option<String>,
    pub on_empty: OnEmpty,
}

impl Default for WebhookBody {
    fn default() -> Self {
        Self {
            raw: None,
            header: None,
            item: None,
            footer: None,
            separator: default_separator(),
            empty: None,
            on_empty: OnEmpty::Send,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

fn default_webhook_method() -> String {
    "POST".to_string()
}

/// Outbound webhook description: URL template, headers (values subject to
/// environment expansion), body configuration and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDescriptor {
    pub url: String,
    #[serde(default = "default_webhook_method")]
    pub method: String,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    #[serde(default)]
    pub body: Option<WebhookBody>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_content_type() -> String {
    "application/json".to_string()
}

fn default_status() -> u16 {
    200
}

/// One unit of workflow work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    Query {
        /// Result-binding name; unnamed query results are not referenceable.
        name: Option<String>,
        database: String,
        sql: String,
        /// Parameter map rendered against the runtime context before binding.
        /// Unset names fall back to the resolved trigger parameters.
        #[serde(default)]
        params: IndexMap<String, serde_json::Value>,
        #[serde(default)]
        session: Option<QuerySessionOverrides>,
        timeout_sec: Option<u64>,
    },
    Response {
        #[serde(default)]
        template: String,
        #[serde(default = "default_content_type")]
        content_type: String,
        #[serde(default = "default_status")]
        status: u16,
    },
    Webhook {
        name: Option<String>,
        /// Named step whose result feeds the execution context; defaults to
        /// the most recent query step.
        source: Option<String>,
        #[serde(default)]
        fatal: bool,
        webhook: WebhookDescriptor,
    },
    ForEach {
        name: Option<String>,
        /// Named step whose rows drive the iteration.
        over: String,
        steps: Vec<Step>,
    },
}

/// A named sequence of steps with its triggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    pub steps: Vec<Step>,
}

/// The whole configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub databases: Vec<DatabaseDescriptor>,
    pub logging: LoggingConfig,
    pub variables: VariablesConfig,
    pub workflows: Vec<Workflow>,
    pub public_ids: Option<PublicIdsConfig>,
}
