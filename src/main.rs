//! Ledger Liquidation Bot
//!
//! Mirrors a lending protocol's pools, prices and user records, and queues
//! liquidations for positions that cross their borrow limit.
//! Features:
//! - Rate-limited access to the ledger endpoint
//! - Live users-page discovery with per-user subscriptions
//! - Periodic sweep with cooldown and queue backpressure
//!
//! This binary replays a scenario file against an in-process ledger and
//! records liquidations with a dry-run submitter.

mod scenario;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use liquidator_core::{BotConfig, Scanner, TaskFailure};
use liquidator_ledger::{DryRunSubmitter, MemoryLedger, SeedDeriver};

use crate::scenario::Scenario;

/// Environment variable names.
mod env {
    pub const SCENARIO: &str = "SCENARIO";
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
}

const DEFAULT_SCENARIO: &str = "demos/scenario.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Print startup banner
    print_banner();

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    // BOT_PROFILE selects a profile, BOT_CONFIG a TOML file
    let bot_config = BotConfig::from_env()?;
    bot_config.log_config();

    let scenario_path =
        std::env::var(env::SCENARIO).unwrap_or_else(|_| DEFAULT_SCENARIO.to_string());
    let scenario = Scenario::from_file(&scenario_path)?;
    info!(path = %scenario_path, "Scenario loaded");

    // In-process ledger seeded from the scenario
    let deriver = Arc::new(SeedDeriver::new(bot_config.ledger.program_id()?));
    let ledger = Arc::new(MemoryLedger::new());
    scenario.seed(&ledger, deriver.as_ref());

    let submitter = Arc::new(DryRunSubmitter::new(scenario.liquidator));
    let scanner = Scanner::new(
        bot_config,
        ledger.clone(),
        submitter.clone(),
        deriver.clone(),
    )?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let failures = scanner.queue().failure_channel();
    let mut handles = scanner.spawn_workers(shutdown_rx.clone());
    handles.push(report_failures(failures, shutdown_rx.clone()));
    handles.push(scenario.spawn_price_moves(ledger, deriver, shutdown_rx.clone()));

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    // Bootstrap
    info!("Bootstrapping...");
    scanner.bootstrap(shutdown_rx.clone()).await?;

    // Run main loop
    info!("Starting sweep loop...");
    scanner.run(shutdown_rx).await?;

    for handle in handles {
        let _ = handle.await;
    }

    info!(
        liquidations = submitter.count(),
        queue = ?scanner.queue().stats(),
        "Liquidator stopped"
    );
    Ok(())
}

/// Escalate tasks the queue gave up on.
fn report_failures(
    mut failures: mpsc::UnboundedReceiver<TaskFailure>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                failure = failures.recv() => match failure {
                    Some(f) if !f.will_retry => error!(
                        task = %f.label,
                        attempts = f.attempt,
                        timed_out = f.timed_out,
                        error = %f.error,
                        "Task abandoned"
                    ),
                    Some(_) => {}
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,liquidator_core=debug"));
    let json = std::env::var(env::LOG_FORMAT)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

fn print_banner() {
    println!(
        r#"
    ╦  ┌─┐┌┬┐┌─┐┌─┐┬─┐  ╦  ┬┌─┐ ┬ ┬┬┌┬┐┌─┐┌┬┐┌─┐┬─┐
    ║  ├┤  ││├┤ ├┤ ├┬┘  ║  ││─┼┐│ ││ ││├─┤ │ │ │├┬┘
    ╩═╝└─┘─┴┘└─┘└─┘┴└─  ╩═╝┴└─┘└└─┘┴─┴┘┴ ┴ ┴ └─┘┴└─
    Liquidation Bot v0.1.0
    "#
    );
}
