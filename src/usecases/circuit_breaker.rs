//! Circuit Breaker - Per-chain Failure Isolation
//!
//! Three-state machine guarding one chain:
//! - `Closed` → `Open`:      consecutive failures reach `failure_threshold`
//! - `Open` → `HalfOpen`:    recovery timer fires after `reset_timeout`
//! - `HalfOpen` → `Closed`:  `half_open_success_threshold` consecutive successes
//! - `HalfOpen` → `Open`:    any single failure
//! - any → `Closed`:         `force_reset` (operator override, shutdown)
//!
//! All transitions for a chain are serialized by that chain's mutex; the
//! lock is never held across an `.await`. The recovery timer is a spawned
//! tokio task owned by the breaker and aborted on reset, re-arm and drop.
//! An epoch counter makes a timer that already woke up harmless after a
//! reset. Without a runtime (plain unit tests) the Open → HalfOpen
//! transition is applied lazily the next time the state is observed.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{ChainConfig, RegistryConfig};
use crate::domain::chain::ChainId;
use crate::domain::error::RegistryError;

use super::telemetry::MetricsHandle;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
  /// Normal operation.
  Closed,
  /// All calls rejected until the recovery timer fires.
  Open,
  /// Probing: successes close the circuit, one failure reopens it.
  HalfOpen,
}

impl std::fmt::Display for CircuitState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Closed => write!(f, "closed"),
      Self::Open => write!(f, "open"),
      Self::HalfOpen => write!(f, "half-open"),
    }
  }
}

/// Thresholds for one chain's breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerConfig {
  /// Consecutive failures (while closed) that open the circuit.
  pub failure_threshold: u32,
  /// How long the circuit stays open before probing.
  pub reset_timeout: Duration,
  /// Consecutive half-open successes that close the circuit.
  pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
  fn default() -> Self {
    Self {
      failure_threshold: 3,
      reset_timeout: Duration::from_millis(30_000),
      half_open_success_threshold: 2,
    }
  }
}

impl CircuitBreakerConfig {
  /// Registry defaults with the chain's overrides applied.
  pub fn for_chain(registry: &RegistryConfig, chain: &ChainConfig) -> Self {
    Self {
      failure_threshold: chain
        .circuit_breaker_threshold
        .unwrap_or(registry.circuit_breaker_threshold)
        .max(1),
      reset_timeout: Duration::from_millis(
        chain
          .circuit_breaker_reset_timeout_ms
          .unwrap_or(registry.circuit_breaker_reset_timeout_ms),
      ),
      half_open_success_threshold: chain
        .half_open_success_threshold
        .unwrap_or(registry.half_open_success_threshold)
        .max(1),
    }
  }
}

/// Point-in-time view of a breaker, safe to hand to callers.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
  pub chain_id: ChainId,
  pub state: CircuitState,
  /// Consecutive failures while closed.
  pub failure_count: u32,
  /// Consecutive successes while half-open.
  pub success_count: u32,
  /// Times the circuit has ever opened.
  pub open_count: u64,
  pub last_failure_at: Option<DateTime<Utc>>,
  pub last_error: Option<String>,
  /// Time left before an open circuit starts probing.
  pub retry_after_ms: Option<u64>,
  pub config: CircuitBreakerConfig,
}

struct BreakerInner {
  state: CircuitState,
  failure_count: u32,
  success_count: u32,
  open_count: u64,
  opened_at: Option<Instant>,
  last_failure_at: Option<DateTime<Utc>>,
  last_error: Option<String>,
  /// Bumped on every transition that invalidates a pending timer.
  epoch: u64,
  recovery_timer: Option<JoinHandle<()>>,
}

impl BreakerInner {
  fn cancel_timer(&mut self) {
    if let Some(timer) = self.recovery_timer.take() {
      timer.abort();
    }
  }
}

struct Shared {
  chain_id: ChainId,
  config: CircuitBreakerConfig,
  inner: Mutex<BreakerInner>,
  metrics: MetricsHandle,
}

/// Thread-safe circuit breaker for a single chain.
pub struct CircuitBreaker {
  shared: Arc<Shared>,
}

impl CircuitBreaker {
  /// Create a new circuit breaker in `Closed` state.
  pub fn new(chain_id: ChainId, config: CircuitBreakerConfig, metrics: MetricsHandle) -> Self {
    Self {
      shared: Arc::new(Shared {
        chain_id,
        config,
        inner: Mutex::new(BreakerInner {
          state: CircuitState::Closed,
          failure_count: 0,
          success_count: 0,
          open_count: 0,
          opened_at: None,
          last_failure_at: None,
          last_error: None,
          epoch: 0,
          recovery_timer: None,
        }),
        metrics,
      }),
    }
  }

  pub fn chain_id(&self) -> &ChainId {
    &self.shared.chain_id
  }

  pub fn config(&self) -> &CircuitBreakerConfig {
    &self.shared.config
  }

  /// Current state.
  pub fn state(&self) -> CircuitState {
    let (state, changed) = {
      let mut inner = self.shared.inner.lock();
      let changed = self.shared.poll_recovery(&mut inner);
      (inner.state, changed)
    };
    self.shared.publish(changed);
    state
  }

  /// Returns `Ok` if a call may proceed, `CircuitOpen` otherwise.
  pub fn check(&self) -> Result<(), RegistryError> {
    let (result, changed) = {
      let mut inner = self.shared.inner.lock();
      let changed = self.shared.poll_recovery(&mut inner);
      let result = if inner.state == CircuitState::Open {
        Err(RegistryError::CircuitOpen {
          chain_id: self.shared.chain_id.clone(),
          retry_after: self.shared.retry_after(&inner).unwrap_or_default(),
          last_error: inner.last_error.clone(),
        })
      } else {
        Ok(())
      };
      (result, changed)
    };
    self.shared.publish(changed);
    result
  }

  /// Record a successful call.
  pub fn record_success(&self) {
    let changed = {
      let mut inner = self.shared.inner.lock();
      let mut changed = self.shared.poll_recovery(&mut inner);
      match inner.state {
        CircuitState::HalfOpen => {
          inner.success_count += 1;
          if inner.success_count >= self.shared.config.half_open_success_threshold {
            self.shared.transition_to_closed(&mut inner);
            info!(chain = %self.shared.chain_id, "Circuit breaker → closed");
            changed = Some(CircuitState::Closed);
          }
        }
        CircuitState::Closed => {
          // Full reset, not a decrement.
          inner.failure_count = 0;
        }
        CircuitState::Open => {}
      }
      changed
    };
    self.shared.publish(changed);
  }

  /// Record a failed call with its error message.
  pub fn record_failure(&self, error: &str) {
    let changed = {
      let mut inner = self.shared.inner.lock();
      let mut changed = self.shared.poll_recovery(&mut inner);
      inner.last_failure_at = Some(Utc::now());
      inner.last_error = Some(error.to_string());

      match inner.state {
        CircuitState::Closed => {
          inner.failure_count += 1;
          if inner.failure_count >= self.shared.config.failure_threshold {
            warn!(
              chain = %self.shared.chain_id,
              failures = inner.failure_count,
              reset_timeout_ms = self.shared.config.reset_timeout.as_millis() as u64,
              error,
              "Circuit breaker → open"
            );
            Shared::transition_to_open(&self.shared, &mut inner);
            changed = Some(CircuitState::Open);
          }
        }
        CircuitState::HalfOpen => {
          warn!(chain = %self.shared.chain_id, error, "Circuit breaker probe failed → open");
          Shared::transition_to_open(&self.shared, &mut inner);
          changed = Some(CircuitState::Open);
        }
        CircuitState::Open => {}
      }
      changed
    };
    self.shared.publish(changed);
  }

  /// Run `op` under breaker protection.
  ///
  /// Fails with `CircuitOpen` without invoking `op` while open. The
  /// original error is returned unchanged; retrying is the caller's
  /// decision.
  pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, RegistryError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, RegistryError>>,
  {
    self.check()?;

    match op().await {
      Ok(value) => {
        self.record_success();
        Ok(value)
      }
      Err(e) => {
        self.record_failure(&e.to_string());
        Err(e)
      }
    }
  }

  /// Return to `Closed` with zero counters from any state, cancelling
  /// any pending recovery timer.
  pub fn force_reset(&self) {
    let previous = {
      let mut inner = self.shared.inner.lock();
      let previous = inner.state;
      inner.cancel_timer();
      self.shared.transition_to_closed(&mut inner);
      previous
    };
    info!(chain = %self.shared.chain_id, from = %previous, "Circuit breaker force reset → closed");
    self.shared.publish(Some(CircuitState::Closed));
  }

  /// Cancel the pending recovery timer (chain deregistration/shutdown).
  pub fn shutdown(&self) {
    let mut inner = self.shared.inner.lock();
    inner.epoch += 1;
    inner.cancel_timer();
  }

  pub fn snapshot(&self) -> CircuitBreakerSnapshot {
    let (snapshot, changed) = {
      let mut inner = self.shared.inner.lock();
      let changed = self.shared.poll_recovery(&mut inner);
      let snapshot = CircuitBreakerSnapshot {
        chain_id: self.shared.chain_id.clone(),
        state: inner.state,
        failure_count: inner.failure_count,
        success_count: inner.success_count,
        open_count: inner.open_count,
        last_failure_at: inner.last_failure_at,
        last_error: inner.last_error.clone(),
        retry_after_ms: self
          .shared
          .retry_after(&inner)
          .map(|d| d.as_millis() as u64),
        config: self.shared.config.clone(),
      };
      (snapshot, changed)
    };
    self.shared.publish(changed);
    snapshot
  }
}

impl Drop for CircuitBreaker {
  fn drop(&mut self) {
    self.shared.inner.lock().cancel_timer();
  }
}

impl std::fmt::Debug for CircuitBreaker {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CircuitBreaker")
      .field("chain_id", &self.shared.chain_id)
      .field("state", &self.shared.inner.lock().state)
      .finish()
  }
}

impl Shared {
  fn transition_to_open(this: &Arc<Self>, inner: &mut BreakerInner) {
    inner.state = CircuitState::Open;
    inner.failure_count = 0;
    inner.success_count = 0;
    inner.open_count += 1;
    inner.opened_at = Some(Instant::now());
    inner.epoch += 1;
    inner.cancel_timer();

    // Without a runtime the transition happens lazily in poll_recovery.
    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
      let weak = Arc::downgrade(this);
      let epoch = inner.epoch;
      let delay = this.config.reset_timeout;
      inner.recovery_timer = Some(runtime.spawn(recovery_timer(weak, epoch, delay)));
    }
  }

  fn transition_to_half_open(&self, inner: &mut BreakerInner) {
    inner.state = CircuitState::HalfOpen;
    inner.failure_count = 0;
    inner.success_count = 0;
    inner.epoch += 1;
  }

  fn transition_to_closed(&self, inner: &mut BreakerInner) {
    inner.state = CircuitState::Closed;
    inner.failure_count = 0;
    inner.success_count = 0;
    inner.opened_at = None;
    inner.epoch += 1;
  }

  /// Apply an overdue Open → HalfOpen transition.
  fn poll_recovery(&self, inner: &mut BreakerInner) -> Option<CircuitState> {
    if inner.state != CircuitState::Open {
      return None;
    }
    let elapsed = inner.opened_at.map(|at| at.elapsed())?;
    if elapsed < self.config.reset_timeout {
      return None;
    }
    inner.cancel_timer();
    self.transition_to_half_open(inner);
    info!(chain = %self.chain_id, "Circuit breaker → half-open");
    Some(CircuitState::HalfOpen)
  }

  fn retry_after(&self, inner: &BreakerInner) -> Option<Duration> {
    if inner.state != CircuitState::Open {
      return None;
    }
    let opened_at = inner.opened_at?;
    Some(self.config.reset_timeout.saturating_sub(opened_at.elapsed()))
  }

  fn on_recovery_timer(&self, epoch: u64) {
    let fired = {
      let mut inner = self.inner.lock();
      if inner.epoch != epoch || inner.state != CircuitState::Open {
        debug!(chain = %self.chain_id, "Stale recovery timer ignored");
        return;
      }
      // This task is the timer; drop its handle rather than abort it.
      inner.recovery_timer = None;
      self.transition_to_half_open(&mut inner);
      true
    };
    if fired {
      info!(chain = %self.chain_id, "Recovery timer fired, circuit breaker → half-open");
      self.publish(Some(CircuitState::HalfOpen));
    }
  }

  fn publish(&self, changed: Option<CircuitState>) {
    if let Some(state) = changed {
      self.metrics
        .update_circuit_breaker_state(&self.chain_id, state == CircuitState::Open);
    }
  }
}

async fn recovery_timer(breaker: Weak<Shared>, epoch: u64, delay: Duration) {
  tokio::time::sleep(delay).await;
  if let Some(shared) = breaker.upgrade() {
    shared.on_recovery_timer(epoch);
  }
}
