//! Lumen Binary Entry Point
//!
//! Runs the metrics agent until Ctrl+C or SIGTERM.
//! Core functionality is provided by the `lumen` library crate.

use std::time::Duration;

use clap::Parser;
use lumen::{
    Agent, AppConfig, PluginRegistry,
    config::parse_duration,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Lumen - Host Metrics Agent
#[derive(Parser, Debug)]
#[command(name = "lumen", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "LUMEN_CONFIG"
    )]
    config: String,

    /// Hostname used in metric paths (overrides config file)
    #[arg(long, env = "LUMEN_HOSTNAME")]
    hostname: Option<String>,

    /// Force every collector onto this interval, e.g. "10s"
    #[arg(long, env = "LUMEN_INTERVAL", value_parser = parse_duration)]
    interval: Option<Duration>,

    /// Grace period for draining handlers on shutdown, e.g. "5s"
    #[arg(long, env = "LUMEN_SHUTDOWN_GRACE", value_parser = parse_duration)]
    shutdown_grace: Option<Duration>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,lumen=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Lumen - Host Metrics Agent");

    let cli = Cli::parse();

    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = AppConfig::load(&cli.config)?;

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(hostname) = cli.hostname {
        config.agent.hostname = Some(hostname);
    }
    if let Some(interval) = cli.interval {
        config.collector_overrides.interval = Some(interval);
    }
    if let Some(grace) = cli.shutdown_grace {
        config.agent.shutdown_grace = grace;
    }

    tracing::info!(
        hostname = %config.agent.resolved_hostname(),
        collectors = config.collectors.len(),
        handlers = config.handlers.len(),
        "Configuration loaded"
    );

    let mut agent = Agent::from_config(&config, &PluginRegistry::with_builtins());
    if agent.collector_names().is_empty() {
        tracing::warn!("No collectors registered; the agent will idle");
    }
    if agent.handler_names().is_empty() {
        tracing::warn!("No handlers registered; collected metrics are discarded");
    }

    agent.start()?;
    tracing::info!("Press Ctrl+C to shutdown");

    let stats_interval = config.agent.stats_interval.filter(|d| !d.is_zero());
    tokio::select! {
        _ = shutdown_signal() => {}
        _ = log_stats(&agent, stats_interval) => {}
    }

    tracing::info!(grace = ?config.agent.shutdown_grace, "Shutting down agent...");
    let report = agent.stop(config.agent.shutdown_grace).await;
    agent.stats().log();

    if !report.is_clean() {
        tracing::warn!(
            abandoned = ?report.abandoned,
            aborted_collectors = ?report.aborted_collectors,
            "Shutdown deadline exceeded"
        );
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Periodically log agent counters. Never completes when disabled.
async fn log_stats(agent: &Agent, every: Option<Duration>) {
    let Some(every) = every else {
        return std::future::pending().await;
    };
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        agent.stats().log();
    }
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
