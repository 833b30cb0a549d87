//! Metrics Sink Port - Telemetry Output Interface
//!
//! The registry publishes request volume, outcomes, breaker state,
//! retries and queue depth through this trait. Calls are best effort:
//! the registry swallows (and debug-logs) every error a sink returns so
//! telemetry can never fail or slow a protected call.

use std::time::Instant;

use crate::domain::chain::ChainId;

/// Receiver of registry telemetry.
pub trait MetricsSink: Send + Sync + 'static {
  /// Record one completed operation. `started` is when the call began.
  fn record_operation(
    &self,
    chain_id: &ChainId,
    operation: &str,
    started: Instant,
    success: bool,
    error_type: Option<&str>,
  ) -> anyhow::Result<()>;

  /// Publish whether the chain's circuit breaker is open.
  fn update_circuit_breaker_state(&self, chain_id: &ChainId, is_open: bool) -> anyhow::Result<()>;

  /// Publish the adapter's connection status.
  fn update_connection_status(
    &self,
    chain_id: &ChainId,
    connected: bool,
    block_height: Option<u64>,
    gas_price: Option<f64>,
  ) -> anyhow::Result<()>;

  /// Publish the number of in-flight protected calls for the chain.
  fn update_queue_depth(&self, chain_id: &ChainId, depth: usize) -> anyhow::Result<()>;

  /// Count one retry of `operation` on the chain.
  fn record_retry_attempt(&self, chain_id: &ChainId, operation: &str) -> anyhow::Result<()>;
}
