//! # sqlgate
//!
//! Configuration-driven SQL gateway: a declarative YAML file defines database
//! connections, workflows, scheduled jobs and outbound webhooks; the runtime
//! turns each trigger into parameterized SQL against one of the configured
//! databases, then renders a templated response or webhook payload.
//!
//! ## Overview
//!
//! sqlgate lets you:
//! - **Declare** databases (SQL Server, embedded SQLite) with pooling and
//!   per-query session tuning
//! - **Execute** workflows: parameterized query, response and webhook steps
//!   driven by HTTP triggers or cron schedules
//! - **Deliver** webhooks with templated payloads and exponential-backoff
//!   retry
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use sqlgate::cmd::{run_service, Cli};
//!
//! #[tokio::main]
//! async fn main() -> sqlgate::Result<()> {
//!     let cli = Cli::parse();
//!     run_service(&cli).await
//! }
//! ```
//!
//! ## Features
//!
//! - **Two-phase templating**: load-time variables resolve once; per-request
//!   templates render against the run's structured context
//! - **Read/write routing**: writes against read-only databases are rejected
//!   before the engine sees them
//! - **Session discipline**: isolation, lock timeout and pragma programs
//!   re-applied on every pooled-connection acquisition
//! - **Structured Logging**: JSON and human-readable log formats
//!
//! ## Architecture
//!
//! ```text
//! Trigger (HTTP / cron) → Workflow executor → Driver manager → SQL engines
//!                                       ↘ Webhook dispatcher → HTTP
//! ```

// Public API exports
pub use errors::{ErrorEnvelope, ErrorKind, GatewayError, Result};

// Public modules
pub mod cmd;
pub mod config;
pub mod db;
pub mod errors;
pub mod log;
pub mod render;
pub mod webhook;
pub mod workflow;
