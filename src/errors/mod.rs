use serde::Serialize;
use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

/// Main error type for sqlgate operations
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Invalid header name: {0}")]
    HeaderName(#[from] reqwest::header::InvalidHeaderName),

    #[error("Invalid header value: {0}")]
    HeaderValue(#[from] reqwest::header::InvalidHeaderValue),

    #[error("JSON serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("SQL Server error: {0}")]
    Tiberius(#[from] tiberius::error::Error),

    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("YAML error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("Template error: {0}")]
    Minijinja(#[from] minijinja::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Env file error: {0}")]
    EnvFile(#[from] dotenvy::Error),

    #[error("Schedule error: {0}")]
    ScheduleError(#[from] JobSchedulerError),

    #[error("Configuration error: {0}")]
    ConfigLoad(String),

    #[error("Configuration invalid:\n{}", .0.join("\n"))]
    ConfigValidate(Vec<String>),

    #[error("Static template error: {0}")]
    TemplateStatic(String),

    #[error("Database connect failed: {0}")]
    DriverConnect(String),

    #[error("Query failed: {0}")]
    DriverQuery(String),

    #[error("Reconnect failed: {0}")]
    DriverReconnect(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Webhook build failed: {0}")]
    WebhookBuild(String),

    #[error("Webhook transport failed: {0}")]
    WebhookTransport(String),

    #[error("Webhook rejected with status {status}: {body}")]
    WebhookStatus { status: u16, body: String },

    #[error("Workflow policy violation: {0}")]
    WorkflowPolicy(String),
}

/// Tagged category for an error, used in the terminal error envelope and to
/// decide retryability. Internal detail (connection strings, hostnames) never
/// travels with the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigLoad,
    ConfigValidate,
    DriverConnect,
    DriverQuery,
    DriverReconnect,
    Cancelled,
    TemplateParse,
    TemplateExec,
    WebhookBuild,
    WebhookTransport,
    WebhookStatus4xx,
    WebhookStatus5xx,
    WorkflowPolicy,
    Internal,
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::ConfigLoad(_)
            | GatewayError::SerdeYaml(_)
            | GatewayError::EnvFile(_)
            | GatewayError::Io(_) => ErrorKind::ConfigLoad,
            GatewayError::ConfigValidate(_) => ErrorKind::ConfigValidate,
            GatewayError::TemplateStatic(_) => ErrorKind::TemplateParse,
            GatewayError::Minijinja(e) => match e.kind() {
                minijinja::ErrorKind::SyntaxError => ErrorKind::TemplateParse,
                _ => ErrorKind::TemplateExec,
            },
            GatewayError::DriverConnect(_) => ErrorKind::DriverConnect,
            GatewayError::DriverQuery(_) | GatewayError::Sqlx(_) | GatewayError::Tiberius(_) => {
                ErrorKind::DriverQuery
            }
            GatewayError::DriverReconnect(_) => ErrorKind::DriverReconnect,
            GatewayError::Cancelled(_) => ErrorKind::Cancelled,
            GatewayError::WebhookBuild(_)
            | GatewayError::UrlParseError(_)
            | GatewayError::HeaderName(_)
            | GatewayError::HeaderValue(_) => ErrorKind::WebhookBuild,
            GatewayError::WebhookTransport(_) | GatewayError::Reqwest(_) => {
                ErrorKind::WebhookTransport
            }
            GatewayError::WebhookStatus { status, .. } if *status < 500 => {
                ErrorKind::WebhookStatus4xx
            }
            GatewayError::WebhookStatus { .. } => ErrorKind::WebhookStatus5xx,
            GatewayError::WorkflowPolicy(_) => ErrorKind::WorkflowPolicy,
            _ => ErrorKind::Internal,
        }
    }

    /// Whether the webhook retry loop may recover from this error.
    /// 4xx rejections and cancellation are always terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::WebhookTransport | ErrorKind::WebhookStatus5xx
        )
    }
}

/// The JSON body returned in place of a workflow's terminal response when
/// execution fails.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorKind,
    pub message: String,
}

impl ErrorEnvelope {
    pub fn from_error(err: &GatewayError) -> Self {
        Self {
            error: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Convenience Result type that uses GatewayError
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GatewayError::ConfigLoad("missing server section".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: missing server section"
        );
    }

    #[test]
    fn test_policy_error_kind() {
        let err = GatewayError::WorkflowPolicy("write on read-only database".to_string());
        assert_eq!(err.kind(), ErrorKind::WorkflowPolicy);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_webhook_status_split() {
        let terminal = GatewayError::WebhookStatus {
            status: 404,
            body: "not found".into(),
        };
        let retryable = GatewayError::WebhookStatus {
            status: 503,
            body: "unavailable".into(),
        };
        assert_eq!(terminal.kind(), ErrorKind::WebhookStatus4xx);
        assert!(!terminal.is_retryable());
        assert_eq!(retryable.kind(), ErrorKind::WebhookStatus5xx);
        assert!(retryable.is_retryable());
    }

    #[test]
    fn test_validation_errors_join() {
        let err = GatewayError::ConfigValidate(vec![
            "database 'a': sqlite requires a path".into(),
            "workflow 'w': unknown database 'b'".into(),
        ]);
        let text = err.to_string();
        assert!(text.contains("sqlite requires a path"));
        assert!(text.contains("unknown database 'b'"));
    }
}
