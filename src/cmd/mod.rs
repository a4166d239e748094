//! Command-line interface and service loop.
//!
//! Thin glue around the engine: load the configuration, connect the database
//! manager, register scheduled workflows, then wait for shutdown. The HTTP
//! transport in front of http-triggered workflows is an external collaborator
//! driving [`WorkflowExecutor`] directly.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::model::Trigger;
use crate::config::load_config_from_path;
use crate::db::manager::DbManager;
use crate::errors::Result;
use crate::log::init_tracing;
use crate::workflow::{TriggerEvent, WorkflowExecutor};

/// Command-line interface structure for the sqlgate service.
#[derive(Parser, Debug)]
#[command(
    name = "sqlgate",
    version,
    about = "Turn YAML-declared workflows into SQL-backed endpoints and scheduled jobs.",
    long_about = "Turn YAML-declared workflows into SQL-backed endpoints and scheduled jobs.\n\
Configuration-driven SQL gateway.\n\n\
Resources:\n  • YAML config: databases, workflows, variables, webhooks\n  • Workflows: parameterized query, response and webhook steps\n  • Triggers: HTTP endpoints (served by the transport layer) and cron schedules"
)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(
        long = "config",
        short = 'c',
        value_name = "FILE",
        default_value = "sqlgate.yaml"
    )]
    pub config: String,

    /// Emit logs in JSON format.
    #[arg(long = "log-json")]
    pub log_json: bool,

    /// Set log level (overrides env vars like RUST_LOG).
    ///
    /// Example: info,warn,debug
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

/// Loads the configuration and runs the gateway until a shutdown signal.
pub async fn run_service(cli: &Cli) -> Result<()> {
    let start_time = Instant::now();

    let loaded = load_config_from_path(&cli.config)?;
    let config = loaded.config.clone();

    init_tracing(cli.log_level.as_deref(), cli.log_json, &config.logging);

    log_service_start(&cli.config);

    let manager = Arc::new(DbManager::connect(&config.databases).await?);
    for (name, failure) in manager.ping().await {
        match failure {
            None => info!(database = %name, "database healthy"),
            Some(e) => warn!(database = %name, "database unhealthy: {e}"),
        }
    }

    let executor = Arc::new(WorkflowExecutor::new(
        Arc::clone(&manager),
        loaded.vars.clone(),
        config.server.clone(),
    )?);

    let shutdown = CancellationToken::new();
    let mut scheduler = JobScheduler::new().await?;
    let mut scheduled = 0usize;

    for workflow in &config.workflows {
        for trigger in &workflow.triggers {
            let Trigger::Cron { schedule, params } = trigger else {
                continue;
            };

            let cron_expr = schedule.clone();
            let schedule = schedule.clone();
            let specs = params.clone();
            let workflow = workflow.clone();
            let executor = Arc::clone(&executor);
            let shutdown = shutdown.clone();
            let workflow_name = workflow.name.clone();

            scheduler
                .add(Job::new_async(cron_expr.as_str(), move |uuid, mut l| {
                    let workflow = workflow.clone();
                    let specs = specs.clone();
                    let executor = Arc::clone(&executor);
                    let cancel = shutdown.child_token();
                    let schedule = schedule.clone();

                    Box::pin(async move {
                        let event = TriggerEvent::scheduled(&schedule);
                        let response = executor
                            .execute_to_response(&workflow, &specs, event, cancel)
                            .await;

                        if response.status < 400 {
                            info!(workflow = %workflow.name, "scheduled run completed");
                            if let Ok(Some(ts)) = l.next_tick_for_job(uuid).await {
                                info!(workflow = %workflow.name, "next run at {ts:?}");
                            }
                        } else {
                            warn!(
                                workflow = %workflow.name,
                                status = response.status,
                                "scheduled run failed: {}", response.body
                            );
                        }
                    })
                })?)
                .await?;

            scheduled += 1;
            info!(workflow = %workflow_name, "cron trigger registered");
        }
    }

    scheduler.start().await?;
    info!(
        workflows = config.workflows.len(),
        scheduled, "gateway ready; press Ctrl+C to stop"
    );

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("shutdown signal received");
            scheduler.shutdown().await?;
            shutdown.cancel();
            manager.close().await?;
            info!(
                uptime_ms = start_time.elapsed().as_millis() as u64,
                "gateway stopped"
            );
        }
        Err(err) => {
            warn!("unable to listen for shutdown signal: {err}");
        }
    }

    Ok(())
}

fn log_service_start(config_path: &str) {
    info!("═══════════════════════════════════════════════════════════");
    info!("🚀 Starting sqlgate ({config_path})");
    info!("═══════════════════════════════════════════════════════════");
}
