//! `lucy` - a multi-tenant AI coworker for team chat
//!
//! The binary is deliberately thin: parse flags, load settings, install
//! the tracing subscriber, wire the core components and run the
//! lifecycle. Chat transport and sandbox adapters plug in here; the
//! defaults are inert so the core can run headless.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lucy_core::agent::NullIntegrationClient;
use lucy_core::sandbox::NoopSandbox;
use lucy_core::scheduler::{estimate_daily_fires, parse_cron, Scheduler};
use lucy_core::{HttpLlmClient, NullTransport, Orchestrator, Settings};

use crate::cli::{Cli, Commands};

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LUCY_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .context("failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(settings).await,
        Commands::CheckConfig => {
            println!("workspace root: {}", settings.workspace_root.display());
            println!("llm gateway:    {}", settings.llm.base_url);
            println!("queue workers:  {}", settings.queue.workers);
            println!(
                "wall clock cap: {}s",
                settings.agent.absolute_max_seconds
            );
            println!(
                "scheduler tick: {}s",
                settings.scheduler.heartbeat_tick_secs
            );
            Ok(())
        }
        Commands::ValidateCron { expression } => {
            parse_cron(&expression).context("invalid cron expression")?;
            let fires = estimate_daily_fires(&expression)?;
            println!("valid; roughly {} fires per day", fires);
            if fires > settings.scheduler.daily_fire_warning {
                println!(
                    "warning: above the {}-per-day guideline",
                    settings.scheduler.daily_fire_warning
                );
            }
            Ok(())
        }
    }
}

async fn run(settings: Settings) -> Result<()> {
    let model = Arc::new(
        HttpLlmClient::new(settings.llm.base_url.clone(), settings.llm.api_key.clone())
            .context("LLM gateway credentials are required to run")?,
    );

    // Adapter seams: a deployment swaps these for the real chat transport,
    // integration gateway and sandbox.
    let transport = Arc::new(NullTransport);
    let integrations = Arc::new(NullIntegrationClient);
    let sandbox = Arc::new(NoopSandbox);

    let orchestrator = Arc::new(Orchestrator::new(
        settings.clone(),
        model,
        transport.clone(),
        integrations,
        sandbox.clone(),
    ));
    orchestrator.start();

    let scheduler = Arc::new(Scheduler::new(
        orchestrator.workspaces(),
        Arc::clone(&orchestrator) as Arc<dyn lucy_core::JobExecutor>,
        sandbox,
        transport,
        settings.scheduler.clone(),
    ));
    let scheduler_stop = scheduler.shutdown_handle();
    let scheduler_task = tokio::spawn(Arc::clone(&scheduler).run());

    info!("lucy is up");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    scheduler_stop.cancel();
    let _ = scheduler_task.await;
    orchestrator.stop().await;
    Ok(())
}
