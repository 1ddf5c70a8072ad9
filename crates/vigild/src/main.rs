//! vigild — the Vigil watchdog CLI.
//!
//! Probes the external services a Vigil host depends on, drives the
//! per-service circuit breakers, and reports aggregated resilience
//! state either once (`check`) or continuously (`watch`).
//!
//! # Usage
//!
//! ```text
//! vigild check --json
//! vigild watch --interval 30 --config services.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use vigil_breaker::CircuitBreaker;
use vigil_core::{BreakerState, ResilienceSnapshot, ServiceRegistry};
use vigil_monitor::{HealthMonitor, HttpProbe};
use vigil_state::StateHub;

#[derive(Parser)]
#[command(name = "vigild", about = "Vigil resilience watchdog")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe every service once and print the aggregated snapshot.
    Check {
        /// Service registry overrides (TOML). Built-in defaults when absent.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the snapshot as pretty JSON.
        #[arg(long)]
        json: bool,
    },

    /// Probe on an interval and stream every state transition.
    Watch {
        /// Service registry overrides (TOML). Built-in defaults when absent.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Sweep interval in seconds.
        #[arg(long, default_value = "30")]
        interval: u64,

        /// Emit one JSON line per transition instead of log output.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vigild=debug,vigil_monitor=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Check { config, json } => run_check(config, json).await,
        Command::Watch {
            config,
            interval,
            json,
        } => run_watch(config, Duration::from_secs(interval), json).await,
    }
}

/// Assemble the registry, breakers, hub, and monitor.
fn build_stack(config: Option<PathBuf>) -> anyhow::Result<(HealthMonitor, Arc<StateHub>)> {
    let registry = match config {
        Some(path) => {
            let registry = ServiceRegistry::from_file(&path)?;
            info!(path = %path.display(), "service registry loaded");
            registry
        }
        None => ServiceRegistry::builtin(),
    };
    let registry = Arc::new(registry);
    let breaker = Arc::new(CircuitBreaker::new(&registry));
    let hub = Arc::new(StateHub::new());
    let monitor = HealthMonitor::new(
        registry,
        breaker,
        Arc::clone(&hub),
        Arc::new(HttpProbe::new()),
    );
    Ok((monitor, hub))
}

async fn run_check(config: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let (monitor, hub) = build_stack(config)?;

    let results = monitor.perform_health_check().await;
    let snapshot = hub.snapshot();

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        for check in results.values() {
            println!("{:<14} {:<10} {}", check.service, check.status, check.message);
        }
        println!("overall: {}", snapshot.overall_health);
    }
    Ok(())
}

async fn run_watch(
    config: Option<PathBuf>,
    interval: Duration,
    json: bool,
) -> anyhow::Result<()> {
    info!("vigild starting in watch mode");
    let (monitor, hub) = build_stack(config)?;

    let mut rx = hub.subscribe();
    // Drop the seed; watch output is transitions only.
    let _ = rx.try_recv();

    let printer = tokio::spawn(async move {
        while let Some(snapshot) = rx.recv().await {
            if json {
                match serde_json::to_string(&snapshot) {
                    Ok(line) => println!("{line}"),
                    Err(e) => error!(error = %e, "snapshot serialization failed"),
                }
            } else {
                report_transition(&snapshot);
            }
        }
    });

    monitor.start_auto_refresh(interval).await;
    monitor.perform_health_check().await;

    // Graceful shutdown on Ctrl-C.
    tokio::signal::ctrl_c()
        .await
        .context("failed to install CTRL+C handler")?;
    info!("shutdown signal received");

    monitor.shutdown().await;
    let _ = printer.await;

    info!("vigild stopped");
    Ok(())
}

/// Log one aggregated snapshot, escalating when any breaker is tripped.
fn report_transition(snapshot: &ResilienceSnapshot) {
    let services: Vec<String> = snapshot
        .services
        .values()
        .map(|check| format!("{}={}", check.service, check.status))
        .collect();
    let tripped: Vec<String> = snapshot
        .circuit_breakers
        .values()
        .filter(|b| b.state != BreakerState::Closed)
        .map(|b| format!("{}={}", b.service, b.state))
        .collect();

    if tripped.is_empty() {
        info!(
            overall = %snapshot.overall_health,
            online = snapshot.is_online,
            services = %services.join(" "),
            "state transition"
        );
    } else {
        warn!(
            overall = %snapshot.overall_health,
            online = snapshot.is_online,
            services = %services.join(" "),
            breakers = %tripped.join(" "),
            "state transition with tripped breakers"
        );
    }
}
