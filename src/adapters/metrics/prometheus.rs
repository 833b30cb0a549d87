//! Prometheus Metrics Sink - Registry Observability
//!
//! Implements the `MetricsSink` port on top of a private Prometheus
//! registry and exposes it on :9090 for Grafana dashboards. Covers
//! operation volume and latency, error types, retries, breaker state,
//! connection health and queue depth.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::get;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use crate::domain::chain::ChainId;
use crate::ports::metrics_sink::MetricsSink;

/// Centralized Prometheus metrics for the adapter registry.
///
/// All metrics follow the naming convention `chain_registry_*` and
/// carry a `chain` label for per-chain filtering.
pub struct PrometheusMetricsSink {
    /// Prometheus registry.
    registry: Registry,
    /// Completed operations by outcome (`success` / `failure`).
    pub operations: IntCounterVec,
    /// Failed operations by error type.
    pub operation_errors: IntCounterVec,
    /// Protected call latency histogram (milliseconds).
    pub operation_latency_ms: HistogramVec,
    /// Retries performed.
    pub retries: IntCounterVec,
    /// Circuit breaker status gauge (1 = open).
    pub circuit_breaker_open: GaugeVec,
    /// Adapter connection status (1 = connected, 0 = disconnected).
    pub adapter_connected: GaugeVec,
    /// Latest block height reported by the adapter.
    pub block_height: GaugeVec,
    /// Gas price reported by the adapter (gwei).
    pub gas_price_gwei: GaugeVec,
    /// In-flight protected calls.
    pub queue_depth: GaugeVec,
}

impl PrometheusMetricsSink {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let operations = IntCounterVec::new(
            Opts::new(
                "chain_registry_operations_total",
                "Completed chain operations by outcome",
            ),
            &["chain", "operation", "outcome"],
        )?;

        let operation_errors = IntCounterVec::new(
            Opts::new(
                "chain_registry_operation_errors_total",
                "Failed chain operations by error type",
            ),
            &["chain", "operation", "error_type"],
        )?;

        let operation_latency_ms = HistogramVec::new(
            HistogramOpts::new(
                "chain_registry_operation_latency_ms",
                "Protected call latency in milliseconds, retries included",
            )
            .buckets(vec![
                5.0, 25.0, 100.0, 250.0, 1000.0, 5000.0, 15000.0, 30000.0,
            ]),
            &["chain", "operation"],
        )?;

        let retries = IntCounterVec::new(
            Opts::new("chain_registry_retries_total", "Retries performed"),
            &["chain", "operation"],
        )?;

        let circuit_breaker_open = GaugeVec::new(
            Opts::new(
                "chain_registry_circuit_breaker_open",
                "Whether the chain's circuit breaker is open (1=yes, 0=no)",
            ),
            &["chain"],
        )?;

        let adapter_connected = GaugeVec::new(
            Opts::new(
                "chain_registry_adapter_connected",
                "Adapter connection status (1=connected, 0=disconnected)",
            ),
            &["chain"],
        )?;

        let block_height = GaugeVec::new(
            Opts::new(
                "chain_registry_block_height",
                "Latest block height reported by the adapter",
            ),
            &["chain"],
        )?;

        let gas_price_gwei = GaugeVec::new(
            Opts::new(
                "chain_registry_gas_price_gwei",
                "Gas price reported by the adapter",
            ),
            &["chain"],
        )?;

        let queue_depth = GaugeVec::new(
            Opts::new(
                "chain_registry_queue_depth",
                "In-flight protected calls per chain",
            ),
            &["chain"],
        )?;

        // Register all metrics
        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(operation_errors.clone()))?;
        registry.register(Box::new(operation_latency_ms.clone()))?;
        registry.register(Box::new(retries.clone()))?;
        registry.register(Box::new(circuit_breaker_open.clone()))?;
        registry.register(Box::new(adapter_connected.clone()))?;
        registry.register(Box::new(block_height.clone()))?;
        registry.register(Box::new(gas_price_gwei.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(Self {
            registry,
            operations,
            operation_errors,
            operation_latency_ms,
            retries,
            circuit_breaker_open,
            adapter_connected,
            block_height,
            gas_price_gwei,
            queue_depth,
        })
    }

    /// Encode every registered metric in the Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Serve Prometheus metrics on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics_self = Arc::clone(&self);

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let sink = Arc::clone(&metrics_self);
                async move { sink.render() }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}

impl MetricsSink for PrometheusMetricsSink {
    fn record_operation(
        &self,
        chain_id: &ChainId,
        operation: &str,
        started: Instant,
        success: bool,
        error_type: Option<&str>,
    ) -> anyhow::Result<()> {
        let chain = chain_id.as_str();
        let outcome = if success { "success" } else { "failure" };
        self.operations
            .get_metric_with_label_values(&[chain, operation, outcome])?
            .inc();
        self.operation_latency_ms
            .get_metric_with_label_values(&[chain, operation])?
            .observe(started.elapsed().as_secs_f64() * 1_000.0);
        if !success {
            self.operation_errors
                .get_metric_with_label_values(&[chain, operation, error_type.unwrap_or("unknown")])?
                .inc();
        }
        Ok(())
    }

    fn update_circuit_breaker_state(&self, chain_id: &ChainId, is_open: bool) -> anyhow::Result<()> {
        self.circuit_breaker_open
            .get_metric_with_label_values(&[chain_id.as_str()])?
            .set(if is_open { 1.0 } else { 0.0 });
        Ok(())
    }

    fn update_connection_status(
        &self,
        chain_id: &ChainId,
        connected: bool,
        block_height: Option<u64>,
        gas_price: Option<f64>,
    ) -> anyhow::Result<()> {
        let chain = chain_id.as_str();
        self.adapter_connected
            .get_metric_with_label_values(&[chain])?
            .set(if connected { 1.0 } else { 0.0 });
        if let Some(height) = block_height {
            self.block_height
                .get_metric_with_label_values(&[chain])?
                .set(height as f64);
        }
        if let Some(price) = gas_price {
            self.gas_price_gwei
                .get_metric_with_label_values(&[chain])?
                .set(price);
        }
        Ok(())
    }

    fn update_queue_depth(&self, chain_id: &ChainId, depth: usize) -> anyhow::Result<()> {
        self.queue_depth
            .get_metric_with_label_values(&[chain_id.as_str()])?
            .set(depth as f64);
        Ok(())
    }

    fn record_retry_attempt(&self, chain_id: &ChainId, operation: &str) -> anyhow::Result<()> {
        self.retries
            .get_metric_with_label_values(&[chain_id.as_str(), operation])?
            .inc();
        Ok(())
    }
}
