//! Tracing bootstrap.
//!
//! The effective settings are resolved from three layers, highest precedence
//! first: CLI flags, the document's `logging` section, then the
//! `SQLGATE_LOG_LEVEL` / `SQLGATE_LOG_FORMAT` environment variables (with
//! `RUST_LOG` as the final filter fallback).

use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use crate::config::model::LoggingConfig;

/// Resolves the effective log level and format, then installs the global
/// subscriber. Called once by the service entrypoint after the configuration
/// document is loaded.
///
/// # Arguments
///
/// * `cli_level` - `--log-level` flag value, if given
/// * `cli_json` - `--log-json` flag
/// * `config` - the document's `logging` section
///
/// # Example
///
/// ```no_run
/// use sqlgate::config::model::LoggingConfig;
/// use sqlgate::log::init_tracing;
///
/// init_tracing(Some("debug"), false, &LoggingConfig::default());
/// tracing::info!("gateway starting");
/// ```
pub fn init_tracing(cli_level: Option<&str>, cli_json: bool, config: &LoggingConfig) {
    let level = cli_level
        .map(str::to_string)
        .or_else(|| config.level.clone())
        .or_else(|| std::env::var("SQLGATE_LOG_LEVEL").ok());

    let env_json = std::env::var("SQLGATE_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let use_json = cli_json || config.json || env_json;

    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    if use_json {
        let subscriber = Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_target(false),
            )
            .with(ErrorLayer::default());

        tracing::subscriber::set_global_default(subscriber)
            .expect("failed to set global tracing subscriber");
    } else {
        let subscriber = Registry::default()
            .with(filter)
            .with(fmt::layer().compact().with_target(false))
            .with(ErrorLayer::default());

        tracing::subscriber::set_global_default(subscriber)
            .expect("failed to set global tracing subscriber");
    }
}
