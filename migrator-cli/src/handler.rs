//! Command Handlers

use migrator_api::{run_server, ApiConfig, AppState};
use migrator_core::RunOutcome;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::client::MigratorClient;
use crate::commands::{Cli, Commands};
use crate::coordinator::Coordinator;
use crate::error::{CliError, CliResult};

/// Run the CLI with parsed arguments
pub async fn run(cli: Cli) -> CliResult<()> {
    match &cli.command {
        Commands::Start { host, port } => handle_start(&cli, host.clone(), *port).await,
        Commands::Resume => handle_resume(&cli).await,
        Commands::Tick => handle_tick(&cli).await,
        Commands::Status { mint, api_url } => handle_status(mint, api_url).await,
    }
}

/// One process: API, startup recovery, scheduler and worker pool
async fn handle_start(cli: &Cli, host: String, port: u16) -> CliResult<()> {
    let coordinator = Coordinator::build(cli).await?;

    let mut api_config = ApiConfig::from_env();
    api_config.host = host;
    api_config.port = port;
    let jwt = api_config
        .jwt()
        .map_err(|e| CliError::config(e.to_string()))?;

    let relay = coordinator.fanout.start_relay().await?;

    // a failed pass leaves the records for the scheduler; only an outage stops startup
    match coordinator.scanner().resume_all().await {
        Ok(report) => info!(scanned = report.scanned, migrated = report.migrated, "startup recovery done"),
        Err(e) if e.is_unavailable() => return Err(e.into()),
        Err(e) => error!(error = %e, "startup recovery failed"),
    }

    let scheduler = Arc::new(coordinator.scheduler()).start();
    let pool = coordinator
        .worker
        .clone()
        .spawn_pool(coordinator.queue.clone(), coordinator.config.concurrency);

    let state = AppState::new(coordinator.operator.clone(), coordinator.fanout.clone(), jwt);
    let served = run_server(&api_config, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
    })
    .await;

    scheduler.stop().await;
    pool.stop().await;
    relay.stop().await;
    info!("coordinator stopped");

    served.map_err(|e| CliError::ServerError {
        message: e.to_string(),
    })
}

async fn handle_resume(cli: &Cli) -> CliResult<()> {
    let coordinator = Coordinator::build(cli).await?;
    let report = coordinator.scanner().resume_all().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Summary of a single tick-and-drain run
#[derive(Debug, Default, Serialize)]
struct TickSummary {
    eligible: usize,
    enqueued: usize,
    migrated: usize,
    pending: usize,
    contended: usize,
    errors: usize,
}

async fn handle_tick(cli: &Cli) -> CliResult<()> {
    let coordinator = Coordinator::build(cli).await?;
    let tick = coordinator.scheduler().tick().await?;

    let mut summary = TickSummary {
        eligible: tick.eligible,
        enqueued: tick.enqueued,
        ..Default::default()
    };
    for (mint, result) in coordinator.worker.drain(&coordinator.queue).await {
        match result {
            Ok(outcome) if outcome.is_migrated() => summary.migrated += 1,
            Ok(RunOutcome::Contended) => summary.contended += 1,
            Ok(_) => summary.pending += 1,
            Err(e) => {
                error!(mint = %mint, error = %e, "migration run failed");
                summary.errors += 1;
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn handle_status(mint: &str, api_url: &str) -> CliResult<()> {
    let client = MigratorClient::new(api_url)?;
    let record = client.token(mint).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
