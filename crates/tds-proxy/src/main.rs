//! Transparent in-line TDS proxy entry point.
//!
//! Loads configuration from the environment (optionally via a `.env` file),
//! initializes tracing, loads the rule catalog and metrics sinks, and runs
//! the accept loop until SIGINT/SIGTERM.

use std::sync::Arc;

use proxy_metrics::{CounterStore, FileDecisionSink};
use proxy_policy::{load_rules, PolicyEngine};
use tokio_util::sync::CancellationToken;

use tds_proxy::config::ProxyConfig;
use tds_proxy::{error, pipe};

#[tokio::main]
async fn main() -> error::Result<()> {
    // A missing `.env` file is the common case in production; proceed with
    // whatever the process environment already provides either way.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(ProxyConfig::from_env());

    let engine = if config.policy_enabled() {
        let rules = load_rules(&config.rules_path);
        tracing::info!(rule_count = rules.len(), "loaded rule catalog");
        Some(Arc::new(PolicyEngine::new(rules, config.environment.clone())))
    } else {
        tracing::info!("policy evaluation disabled (ENABLE_SQL_TEXT_SNIFF and ENABLE_TDS_PARSER both false)");
        None
    };

    let counters = Arc::new(CounterStore::new(config.metrics_path.clone()));
    let decisions: proxy_metrics::SharedDecisionSink =
        Arc::new(FileDecisionSink::new(config.decisions_path.clone()));

    let shutdown = CancellationToken::new();
    let shutdown_signals = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received");
        shutdown_signals.cancel();
    });

    pipe::run_proxy(config, engine, counters, decisions, shutdown).await
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
