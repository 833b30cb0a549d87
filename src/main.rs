//! Chain Adapter Registry — Entry Point
//!
//! Initializes configuration, logging, the registry and its chains,
//! and the monitoring servers. Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config.toml + validate (path from CHAIN_REGISTRY_CONFIG)
//! 2. Init tracing (JSON structured logging)
//! 3. Create Prometheus sink + simulated adapter factory
//! 4. Register chains, then their fallbacks
//! 5. Initialize (all-settle connect) + start health-check loop
//! 6. Spawn Prometheus server on :9090 and status server on :8080
//! 7. Log a metrics heartbeat until SIGINT
//! 8. Graceful shutdown (stop servers → stop health loop → disconnect)

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use chain_adapter_registry::adapters::metrics::{PrometheusMetricsSink, StatusServer};
use chain_adapter_registry::adapters::simulated::SimulatedAdapterFactory;
use chain_adapter_registry::config;
use chain_adapter_registry::usecases::{AdapterRegistry, CircuitState};

/// Environment variable overriding the config file location.
const CONFIG_ENV: &str = "CHAIN_REGISTRY_CONFIG";

/// Interval between metrics heartbeat log lines.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration from config.toml ──────────────
    let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "config.toml".to_string());
    let config = config::loader::load_config(&config_path)
        .with_context(|| format!("Failed to load configuration from {config_path}"))?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.service.log_level)),
        )
        .json()
        .init();

    info!(
        name = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        chains = config.chains.len(),
        fallback = config.registry.use_fallback_chains,
        "Starting chain adapter registry"
    );

    // ── 3. Shutdown channel, metrics sink, adapter factory ──
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);
    let sink = Arc::new(
        PrometheusMetricsSink::new().context("Failed to register Prometheus metrics")?,
    );
    let factory = Arc::new(SimulatedAdapterFactory::new());

    let registry = Arc::new(AdapterRegistry::with_metrics_sink(
        config.registry.clone(),
        factory,
        sink.clone(),
    ));

    // ── 4. Register chains, then fallbacks ──────────────────
    for chain in &config.chains {
        registry
            .register_chain(chain.clone())
            .with_context(|| format!("Failed to register chain {} ({})", chain.id, chain.name))?;
    }
    for chain in &config.chains {
        if let Some(fallback) = &chain.fallback {
            registry
                .set_fallback_chain(&chain.id, fallback)
                .with_context(|| format!("Failed to set fallback for chain {}", chain.id))?;
        }
    }

    // ── 5. Connect every adapter (all-settle) ───────────────
    let summary = registry.initialize().await;
    for failure in &summary.failed {
        warn!(chain = %failure.chain_id, error = %failure.error, "Chain unavailable at startup");
    }

    // ── 6. Spawn Prometheus and status servers ──────────────
    let metrics_handle = tokio::spawn(
        Arc::clone(&sink).serve(config.metrics.bind_address.clone(), shutdown_tx.subscribe()),
    );
    let status_server = StatusServer::new(Arc::clone(&registry), config.metrics.status_port);
    let status_handle = tokio::spawn(status_server.run(shutdown_tx.subscribe()));

    info!(
        connected = summary.connected.len(),
        failed = summary.failed.len(),
        "Registry running"
    );

    // ── 7. Heartbeat until SIGINT ───────────────────────────
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("SIGINT received, initiating graceful shutdown");
                break;
            }
            _ = heartbeat.tick() => {
                let metrics = registry.get_metrics();
                let open = metrics
                    .chains
                    .iter()
                    .filter(|c| c.circuit_state == CircuitState::Open)
                    .count();
                info!(
                    requests = metrics.total_requests,
                    successes = metrics.total_successes,
                    failures = metrics.total_failures,
                    fallbacks = metrics.fallback_attempts,
                    open_breakers = open,
                    "Registry heartbeat"
                );
            }
        }
    }

    // ── 8. Graceful shutdown ────────────────────────────────
    let _ = shutdown_tx.send(());
    info!("Shutdown signal broadcast to servers");

    registry.shutdown().await;

    for (name, handle) in [("metrics", metrics_handle), ("status", status_handle)] {
        match tokio::time::timeout(Duration::from_secs(5), handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!(server = name, error = %e, "Server failed"),
            Ok(Err(e)) => error!(server = name, error = %e, "Server task panicked"),
            Err(_) => warn!(server = name, "Server did not stop within 5s"),
        }
    }

    info!("Shutdown complete");
    Ok(())
}
