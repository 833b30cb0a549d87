//! Status Server - Liveness, Readiness and Registry Status
//!
//! Exposes /live, /ready and /status endpoints via axum 0.7 for Docker
//! health checks and dashboards. Readiness depends on the registry being
//! initialized with at least one chain whose breaker is not open.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::usecases::registry::{AdapterRegistry, RegistryMetrics};

/// Axum-based status HTTP server.
///
/// Serves liveness (/live), readiness (/ready) and the JSON metrics
/// snapshot (/status).
pub struct StatusServer {
    /// Registry whose state the endpoints report.
    registry: Arc<AdapterRegistry>,
    /// Bind port (default 8080 from config).
    port: u16,
}

impl StatusServer {
    /// Create a new status server.
    pub fn new(registry: Arc<AdapterRegistry>, port: u16) -> Self {
        Self { registry, port }
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .route("/status", get(Self::status))
            .with_state(Arc::clone(&self.registry))
    }

    /// Start the status server in the background.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let app = self.router();

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!(address = %addr, "Status server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Liveness probe: always returns 200 if the process is running.
    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    /// Readiness probe: 200 once initialized with a usable chain.
    async fn readiness(State(registry): State<Arc<AdapterRegistry>>) -> impl IntoResponse {
        if registry.is_ready() {
            (StatusCode::OK, "READY")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }

    async fn status(State(registry): State<Arc<AdapterRegistry>>) -> Json<RegistryMetrics> {
        Json(registry.get_metrics())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::simulated::SimulatedAdapterFactory;
    use crate::config::{ChainConfig, RegistryConfig};

    fn registry() -> Arc<AdapterRegistry> {
        let registry = AdapterRegistry::new(
            RegistryConfig::default(),
            Arc::new(SimulatedAdapterFactory::new()),
        );
        registry
            .register_chain(ChainConfig::new(1_u64, "ethereum"))
            .unwrap();
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_not_ready_before_initialize() {
        let registry = registry();
        let response = StatusServer::readiness(State(Arc::clone(&registry)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        registry.initialize().await;
        let response = StatusServer::readiness(State(Arc::clone(&registry)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_reports_chains() {
        let registry = registry();
        let Json(metrics) = StatusServer::status(State(registry)).await;
        assert_eq!(metrics.chains.len(), 1);
        assert_eq!(metrics.total_requests, 0);
        assert!(!metrics.initialized);
    }
}
