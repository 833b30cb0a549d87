//! Telemetry Handle - Optional, Failure-Swallowing Metrics Port
//!
//! Wraps an optional `MetricsSink`. When no sink is installed (or
//! metrics are disabled) every call is a no-op; when a sink returns an
//! error it is logged at debug level and dropped. Cloned into every
//! circuit breaker and retry executor so they publish without knowing
//! whether anyone listens.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::domain::chain::ChainId;
use crate::ports::metrics_sink::MetricsSink;

/// Cheaply clonable handle to an optional metrics sink.
#[derive(Clone, Default)]
pub struct MetricsHandle {
  sink: Option<Arc<dyn MetricsSink>>,
}

impl MetricsHandle {
  /// Handle that publishes to `sink`.
  pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
    Self { sink: Some(sink) }
  }

  /// Handle that drops everything.
  pub fn disabled() -> Self {
    Self { sink: None }
  }

  pub fn is_enabled(&self) -> bool {
    self.sink.is_some()
  }

  pub fn record_operation(
    &self,
    chain_id: &ChainId,
    operation: &str,
    started: Instant,
    success: bool,
    error_type: Option<&str>,
  ) {
    self.publish("record_operation", |sink| {
      sink.record_operation(chain_id, operation, started, success, error_type)
    });
  }

  pub fn update_circuit_breaker_state(&self, chain_id: &ChainId, is_open: bool) {
    self.publish("update_circuit_breaker_state", |sink| {
      sink.update_circuit_breaker_state(chain_id, is_open)
    });
  }

  pub fn update_connection_status(
    &self,
    chain_id: &ChainId,
    connected: bool,
    block_height: Option<u64>,
    gas_price: Option<f64>,
  ) {
    self.publish("update_connection_status", |sink| {
      sink.update_connection_status(chain_id, connected, block_height, gas_price)
    });
  }

  pub fn update_queue_depth(&self, chain_id: &ChainId, depth: usize) {
    self.publish("update_queue_depth", |sink| {
      sink.update_queue_depth(chain_id, depth)
    });
  }

  pub fn record_retry_attempt(&self, chain_id: &ChainId, operation: &str) {
    self.publish("record_retry_attempt", |sink| {
      sink.record_retry_attempt(chain_id, operation)
    });
  }

  fn publish<F>(&self, call: &'static str, f: F)
  where
    F: FnOnce(&dyn MetricsSink) -> anyhow::Result<()>,
  {
    if let Some(sink) = &self.sink {
      if let Err(e) = f(sink.as_ref()) {
        debug!(call, error = %e, "Metrics sink call failed, ignoring");
      }
    }
  }
}

impl std::fmt::Debug for MetricsHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MetricsHandle")
      .field("enabled", &self.is_enabled())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;

  struct FailingSink {
    calls: AtomicUsize,
  }

  impl MetricsSink for FailingSink {
    fn record_operation(
      &self,
      _chain_id: &ChainId,
      _operation: &str,
      _started: Instant,
      _success: bool,
      _error_type: Option<&str>,
    ) -> anyhow::Result<()> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      anyhow::bail!("sink unavailable")
    }

    fn update_circuit_breaker_state(&self, _: &ChainId, _: bool) -> anyhow::Result<()> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      anyhow::bail!("sink unavailable")
    }

    fn update_connection_status(
      &self,
      _: &ChainId,
      _: bool,
      _: Option<u64>,
      _: Option<f64>,
    ) -> anyhow::Result<()> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      anyhow::bail!("sink unavailable")
    }

    fn update_queue_depth(&self, _: &ChainId, _: usize) -> anyhow::Result<()> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      anyhow::bail!("sink unavailable")
    }

    fn record_retry_attempt(&self, _: &ChainId, _: &str) -> anyhow::Result<()> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      anyhow::bail!("sink unavailable")
    }
  }

  #[test]
  fn test_sink_errors_are_swallowed() {
    let sink = Arc::new(FailingSink {
      calls: AtomicUsize::new(0),
    });
    let handle = MetricsHandle::new(sink.clone());
    let chain = ChainId::from("1");

    handle.record_operation(&chain, "getBalance", Instant::now(), true, None);
    handle.update_circuit_breaker_state(&chain, true);
    handle.update_connection_status(&chain, false, None, None);
    handle.update_queue_depth(&chain, 3);
    handle.record_retry_attempt(&chain, "getBalance");

    assert_eq!(sink.calls.load(Ordering::SeqCst), 5);
  }

  #[test]
  fn test_disabled_handle_is_noop() {
    let handle = MetricsHandle::disabled();
    assert!(!handle.is_enabled());
    handle.update_queue_depth(&ChainId::from("1"), 1);
  }
}
