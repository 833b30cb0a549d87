//! Adapter Registry - Protected Multi-chain Execution
//!
//! Owns one bundle per registered chain: the adapter, its circuit
//! breaker, its retry executor, its operation timeout and its counters.
//! Every chain operation funnels through `execute_protected`:
//!
//! 1. Count the request and raise the chain's queue depth
//! 2. Breaker gate → timeout → retry loop → adapter
//! 3. Count the success or failure and lower the queue depth
//! 4. On failure, optionally run the same operation once on the
//!    chain's fallback (never transitively)
//!
//! Chains are independent failure domains: each bundle has its own
//! locks, and the registry-level maps are only locked long enough to
//! clone an `Arc`. No lock is held across an `.await`.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ChainConfig, RegistryConfig};
use crate::domain::chain::{
  AdapterStatus, ChainId, Quote, QuoteRequest, TradeOrder, TradeResult, TransactionStatus,
};
use crate::domain::error::RegistryError;
use crate::ports::chain_adapter::{AdapterFactory, ChainAdapter};
use crate::ports::metrics_sink::MetricsSink;

use super::circuit_breaker::{
  CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
};
use super::retry_executor::{RetryExecutor, RetryPolicy};
use super::telemetry::MetricsHandle;

/// Future returned by an operation applied to one chain's adapter.
pub type AdapterCall<T> = BoxFuture<'static, anyhow::Result<T>>;

const GET_BALANCE: &str = "getBalance";
const GET_QUOTE: &str = "getQuote";
const GET_BRIDGE_QUOTE: &str = "getBridgeQuote";
const EXECUTE_TRADE: &str = "executeTrade";
const GET_TRANSACTION_STATUS: &str = "getTransactionStatus";

/// Mutable per-chain counters, guarded by the chain's own mutex.
#[derive(Debug, Default)]
struct ChainStats {
  requests: u64,
  successes: u64,
  failures: u64,
  total_latency: Duration,
  traded_volume: Decimal,
  last_error: Option<String>,
  last_failure_at: Option<DateTime<Utc>>,
  status: AdapterStatus,
}

/// Everything the registry owns for one chain. Created and dropped as a
/// unit.
struct ChainEntry {
  config: ChainConfig,
  adapter: Arc<dyn ChainAdapter>,
  breaker: CircuitBreaker,
  retry: RetryExecutor,
  timeout: Duration,
  stats: Mutex<ChainStats>,
  queue_depth: AtomicUsize,
}

impl ChainEntry {
  fn id(&self) -> &ChainId {
    &self.config.id
  }
}

#[derive(Debug, Default)]
struct RegistryTotals {
  requests: AtomicU64,
  successes: AtomicU64,
  failures: AtomicU64,
  fallbacks: AtomicU64,
  /// Retries of chains that have since been deregistered.
  retired_retries: AtomicU64,
  last_failure: Mutex<Option<(String, DateTime<Utc>)>>,
}

/// A chain that failed to come up during `initialize`.
#[derive(Debug, Clone, Serialize)]
pub struct ChainFailure {
  pub chain_id: ChainId,
  pub error: String,
}

/// Per-chain outcome of the all-settle initialization pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InitializationSummary {
  pub connected: Vec<ChainId>,
  pub failed: Vec<ChainFailure>,
}

/// Result of one health-check pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthCheckReport {
  /// Adapters that reported a live connection.
  pub healthy: Vec<ChainId>,
  /// Disconnected adapters that came back after `connect()`.
  pub reconnected: Vec<ChainId>,
  /// Disconnected adapters that are still down.
  pub unhealthy: Vec<ChainId>,
}

enum ChainHealth {
  Healthy,
  Reconnected,
  Unhealthy,
}

/// Per-chain metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ChainMetrics {
  pub chain_id: ChainId,
  pub name: String,
  pub circuit_state: CircuitState,
  pub failure_count: u32,
  pub open_count: u64,
  pub last_error: Option<String>,
  pub last_failure_at: Option<DateTime<Utc>>,
  pub requests: u64,
  pub successes: u64,
  pub failures: u64,
  /// 1.0 until the first call completes.
  pub success_rate: f64,
  pub average_latency_ms: f64,
  pub traded_volume: Decimal,
  pub queue_depth: usize,
  pub retries: u64,
  pub fallback: Option<ChainId>,
  pub adapter_status: AdapterStatus,
}

/// Registry-wide metrics snapshot (served on `/status`).
#[derive(Debug, Clone, Serialize)]
pub struct RegistryMetrics {
  pub initialized: bool,
  pub total_requests: u64,
  pub total_successes: u64,
  pub total_failures: u64,
  /// Retries across every chain, deregistered ones included.
  pub total_retries: u64,
  pub fallback_attempts: u64,
  /// Most recent failure on any chain.
  pub last_error: Option<String>,
  pub last_failure_at: Option<DateTime<Utc>>,
  pub chains: Vec<ChainMetrics>,
}

/// Registry of chain adapters with per-chain reliability policies.
pub struct AdapterRegistry {
  config: RegistryConfig,
  factory: Arc<dyn AdapterFactory>,
  metrics: MetricsHandle,
  chains: RwLock<HashMap<ChainId, Arc<ChainEntry>>>,
  fallbacks: RwLock<HashMap<ChainId, ChainId>>,
  totals: RegistryTotals,
  initialized: AtomicBool,
  shutdown_tx: broadcast::Sender<()>,
  health_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AdapterRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AdapterRegistry")
      .field("config", &self.config)
      .finish_non_exhaustive()
  }
}

impl AdapterRegistry {
  /// Registry without telemetry.
  pub fn new(config: RegistryConfig, factory: Arc<dyn AdapterFactory>) -> Self {
    Self::build(config, factory, MetricsHandle::disabled())
  }

  /// Registry publishing to `sink` (unless `metrics_enabled` is off).
  pub fn with_metrics_sink(
    config: RegistryConfig,
    factory: Arc<dyn AdapterFactory>,
    sink: Arc<dyn MetricsSink>,
  ) -> Self {
    let metrics = if config.metrics_enabled {
      MetricsHandle::new(sink)
    } else {
      MetricsHandle::disabled()
    };
    Self::build(config, factory, metrics)
  }

  fn build(config: RegistryConfig, factory: Arc<dyn AdapterFactory>, metrics: MetricsHandle) -> Self {
    let (shutdown_tx, _) = broadcast::channel(1);
    Self {
      config,
      factory,
      metrics,
      chains: RwLock::new(HashMap::new()),
      fallbacks: RwLock::new(HashMap::new()),
      totals: RegistryTotals::default(),
      initialized: AtomicBool::new(false),
      shutdown_tx,
      health_task: Mutex::new(None),
    }
  }

  pub fn config(&self) -> &RegistryConfig {
    &self.config
  }

  pub fn is_initialized(&self) -> bool {
    self.initialized.load(Ordering::Acquire)
  }

  /// Registered chain ids, sorted.
  pub fn chain_ids(&self) -> Vec<ChainId> {
    let mut ids: Vec<ChainId> = self.chains.read().keys().cloned().collect();
    ids.sort();
    ids
  }

  // ────────────────────────────────────────────
  // Registration
  // ────────────────────────────────────────────

  /// Register a chain: build its adapter and wrap it with a fresh
  /// circuit breaker and retry executor.
  ///
  /// Registering an already-registered chain is a no-op with a warning.
  /// Returns the registry so registrations can be chained.
  ///
  /// # Errors
  /// `AdapterCreation` if the factory rejects the chain's settings.
  pub fn register_chain(&self, chain: ChainConfig) -> Result<&Self, RegistryError> {
    if self.chains.read().contains_key(&chain.id) {
      warn!(chain = %chain.id, "Chain already registered, ignoring");
      return Ok(self);
    }

    let adapter = self
      .factory
      .create_adapter(&chain)
      .map_err(|source| RegistryError::AdapterCreation {
        chain_id: chain.id.clone(),
        source,
      })?;

    let breaker_config = CircuitBreakerConfig::for_chain(&self.config, &chain);
    let policy = RetryPolicy::for_chain(&self.config, &chain);
    let timeout = Duration::from_millis(
      chain
        .operation_timeout_ms
        .unwrap_or(self.config.operation_timeout_ms),
    );

    info!(
      chain = %chain.id,
      name = %chain.name,
      max_retries = policy.max_retries,
      breaker_threshold = breaker_config.failure_threshold,
      reset_timeout_ms = breaker_config.reset_timeout.as_millis() as u64,
      timeout_ms = timeout.as_millis() as u64,
      "Registering chain"
    );

    let entry = Arc::new(ChainEntry {
      breaker: CircuitBreaker::new(chain.id.clone(), breaker_config, self.metrics.clone()),
      retry: RetryExecutor::new(chain.id.clone(), policy, self.metrics.clone()),
      adapter,
      timeout,
      stats: Mutex::new(ChainStats::default()),
      queue_depth: AtomicUsize::new(0),
      config: chain,
    });

    {
      let mut chains = self.chains.write();
      if chains.contains_key(entry.id()) {
        warn!(chain = %entry.id(), "Chain registered concurrently, ignoring");
        return Ok(self);
      }
      chains.insert(entry.id().clone(), Arc::clone(&entry));
    }

    self.metrics.update_queue_depth(entry.id(), 0);
    self.metrics.update_circuit_breaker_state(entry.id(), false);
    Ok(self)
  }

  /// Remove a chain, its fallback relations and its timers, then
  /// disconnect its adapter (best effort).
  ///
  /// # Errors
  /// `UnknownChain` if the chain is not registered.
  pub async fn deregister_chain(&self, chain_id: &ChainId) -> Result<(), RegistryError> {
    let entry = self
      .chains
      .write()
      .remove(chain_id)
      .ok_or_else(|| RegistryError::UnknownChain(chain_id.clone()))?;

    self.fallbacks
      .write()
      .retain(|primary, fallback| primary != chain_id && fallback != chain_id);
    entry.breaker.shutdown();
    self.totals
      .retired_retries
      .fetch_add(entry.retry.lifetime_retries(), Ordering::Relaxed);

    match tokio::time::timeout(entry.timeout, entry.adapter.disconnect()).await {
      Ok(Ok(())) => info!(chain = %chain_id, "Chain deregistered"),
      Ok(Err(e)) => warn!(chain = %chain_id, error = %e, "Chain deregistered, disconnect failed"),
      Err(_) => warn!(chain = %chain_id, "Chain deregistered, disconnect timed out"),
    }
    Ok(())
  }

  /// Route failed calls on `primary` to `fallback`, replacing any
  /// previous fallback.
  ///
  /// # Errors
  /// - `InvalidFallback` if `primary == fallback` or `fallback` is not registered
  /// - `UnknownChain` if `primary` is not registered
  pub fn set_fallback_chain(&self, primary: &ChainId, fallback: &ChainId) -> Result<(), RegistryError> {
    if primary == fallback {
      return Err(RegistryError::InvalidFallback {
        primary: primary.clone(),
        fallback: fallback.clone(),
        reason: "a chain cannot fall back to itself".to_string(),
      });
    }
    {
      let chains = self.chains.read();
      if !chains.contains_key(primary) {
        return Err(RegistryError::UnknownChain(primary.clone()));
      }
      if !chains.contains_key(fallback) {
        return Err(RegistryError::InvalidFallback {
          primary: primary.clone(),
          fallback: fallback.clone(),
          reason: "fallback chain is not registered".to_string(),
        });
      }
    }

    let previous = self.fallbacks.write().insert(primary.clone(), fallback.clone());
    match previous {
      Some(previous) if &previous != fallback => {
        info!(primary = %primary, fallback = %fallback, %previous, "Fallback chain replaced");
      }
      _ => info!(primary = %primary, fallback = %fallback, "Fallback chain set"),
    }
    Ok(())
  }

  pub fn fallback_for(&self, chain_id: &ChainId) -> Option<ChainId> {
    self.fallbacks.read().get(chain_id).cloned()
  }

  // ────────────────────────────────────────────
  // Lifecycle
  // ────────────────────────────────────────────

  /// Initialize and connect every adapter concurrently, then start the
  /// health-check loop.
  ///
  /// One chain failing does not stop the others; the outcome of every
  /// chain is returned. Calling this twice is a no-op with a warning.
  #[instrument(skip(self))]
  pub async fn initialize(self: &Arc<Self>) -> InitializationSummary {
    if self
      .initialized
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      warn!("Registry already initialized, ignoring");
      return InitializationSummary::default();
    }

    let entries = self.entries();
    let outcomes = join_all(entries.iter().map(|entry| async move {
      let result = tokio::time::timeout(entry.timeout, async {
        entry.adapter.initialize().await?;
        entry.adapter.connect().await
      })
      .await;
      let result = match result {
        Ok(inner) => inner,
        Err(_) => Err(anyhow::anyhow!(
          "initialization timed out after {}ms",
          entry.timeout.as_millis()
        )),
      };
      (entry, result)
    }))
    .await;

    let mut summary = InitializationSummary::default();
    for (entry, result) in outcomes {
      let connected = result.is_ok();
      entry.stats.lock().status.is_connected = connected;
      self.metrics
        .update_connection_status(entry.id(), connected, None, None);
      match result {
        Ok(()) => {
          info!(chain = %entry.id(), "Adapter connected");
          summary.connected.push(entry.id().clone());
        }
        Err(e) => {
          error!(chain = %entry.id(), error = %e, "Adapter failed to initialize");
          summary.failed.push(ChainFailure {
            chain_id: entry.id().clone(),
            error: e.to_string(),
          });
        }
      }
    }

    self.start_health_loop();

    info!(
      connected = summary.connected.len(),
      failed = summary.failed.len(),
      "Registry initialized"
    );
    summary
  }

  fn start_health_loop(self: &Arc<Self>) {
    let registry = Arc::downgrade(self);
    let interval = Duration::from_millis(self.config.health_check_interval_ms);
    let shutdown_rx = self.shutdown_tx.subscribe();
    let handle = tokio::spawn(health_loop(registry, interval, shutdown_rx));
    if let Some(previous) = self.health_task.lock().replace(handle) {
      previous.abort();
    }
  }

  /// Stop the health loop, cancel breaker timers and disconnect every
  /// adapter concurrently.
  #[instrument(skip(self))]
  pub async fn shutdown(&self) {
    self.initialized.store(false, Ordering::Release);
    let _ = self.shutdown_tx.send(());
    let health_task = self.health_task.lock().take();
    if let Some(task) = health_task {
      if let Err(e) = task.await {
        if !e.is_cancelled() {
          warn!(error = %e, "Health-check task ended abnormally");
        }
      }
    }

    let entries = self.entries();
    for entry in &entries {
      entry.breaker.shutdown();
    }

    let outcomes = join_all(entries.iter().map(|entry| async move {
      let result = tokio::time::timeout(entry.timeout, entry.adapter.disconnect()).await;
      (entry, result)
    }))
    .await;

    for (entry, result) in outcomes {
      entry.stats.lock().status.is_connected = false;
      self.metrics
        .update_connection_status(entry.id(), false, None, None);
      match result {
        Ok(Ok(())) => debug!(chain = %entry.id(), "Adapter disconnected"),
        Ok(Err(e)) => warn!(chain = %entry.id(), error = %e, "Adapter disconnect failed"),
        Err(_) => warn!(chain = %entry.id(), "Adapter disconnect timed out"),
      }
    }

    info!(chains = entries.len(), "Registry shut down");
  }

  /// One best-effort health pass over every chain.
  ///
  /// Status queries are bounded by each chain's timeout. Disconnected
  /// adapters get one `connect()` attempt; nothing here raises.
  #[instrument(skip(self))]
  pub async fn run_health_check(&self) -> HealthCheckReport {
    let entries = self.entries();
    let results = join_all(entries.iter().map(|entry| self.check_chain(entry))).await;

    let mut report = HealthCheckReport::default();
    for (entry, health) in entries.iter().zip(results) {
      let id = entry.id().clone();
      match health {
        ChainHealth::Healthy => report.healthy.push(id),
        ChainHealth::Reconnected => report.reconnected.push(id),
        ChainHealth::Unhealthy => report.unhealthy.push(id),
      }
    }

    debug!(
      healthy = report.healthy.len(),
      reconnected = report.reconnected.len(),
      unhealthy = report.unhealthy.len(),
      "Health check complete"
    );
    report
  }

  async fn check_chain(&self, entry: &ChainEntry) -> ChainHealth {
    let status = match tokio::time::timeout(entry.timeout, entry.adapter.get_status()).await {
      Ok(Ok(status)) => status,
      Ok(Err(e)) => {
        warn!(chain = %entry.id(), error = %e, "Status query failed");
        AdapterStatus {
          errors: vec![e.to_string()],
          ..AdapterStatus::default()
        }
      }
      Err(_) => {
        warn!(chain = %entry.id(), "Status query timed out");
        AdapterStatus {
          errors: vec!["status query timed out".to_string()],
          ..AdapterStatus::default()
        }
      }
    };

    self.metrics.update_connection_status(
      entry.id(),
      status.is_connected,
      status.block_height,
      status.gas_price,
    );
    let connected = status.is_connected;
    entry.stats.lock().status = status;

    if connected {
      return ChainHealth::Healthy;
    }

    warn!(chain = %entry.id(), "Adapter disconnected, attempting reconnect");
    match tokio::time::timeout(entry.timeout, entry.adapter.connect()).await {
      Ok(Ok(())) => {
        info!(chain = %entry.id(), "Adapter reconnected");
        entry.stats.lock().status.is_connected = true;
        self.metrics
          .update_connection_status(entry.id(), true, None, None);
        ChainHealth::Reconnected
      }
      Ok(Err(e)) => {
        warn!(chain = %entry.id(), error = %e, "Reconnect failed");
        ChainHealth::Unhealthy
      }
      Err(_) => {
        warn!(chain = %entry.id(), "Reconnect timed out");
        ChainHealth::Unhealthy
      }
    }
  }

  // ────────────────────────────────────────────
  // Protected operations
  // ────────────────────────────────────────────

  /// Balance of `address` on `chain_id`.
  ///
  /// The adapter's answer must parse as a non-negative decimal; anything
  /// else is retried and finally reported as `ValidationFailed`.
  pub async fn get_balance(
    &self,
    chain_id: &ChainId,
    address: &str,
    use_fallback: bool,
  ) -> Result<Decimal, RegistryError> {
    let address: Arc<str> = Arc::from(address);
    let op = move |adapter: Arc<dyn ChainAdapter>| -> AdapterCall<Option<Decimal>> {
      let address = Arc::clone(&address);
      async move {
        let raw = adapter.get_balance(&address).await?;
        Ok(parse_balance(&raw))
      }
      .boxed()
    };

    let balance = self
      .execute_protected(chain_id, GET_BALANCE, use_fallback, &op, &|b: &Option<Decimal>| {
        b.is_some()
      })
      .await?;

    balance.ok_or_else(|| RegistryError::ValidationFailed {
      chain_id: chain_id.clone(),
      operation: GET_BALANCE.to_string(),
      attempts: 0,
    })
  }

  /// Price quote for `request`.
  ///
  /// Same-chain requests take the protected path. Cross-chain requests
  /// get a bridging estimate from the source adapter instead.
  pub async fn get_quote(&self, request: &QuoteRequest, use_fallback: bool) -> Result<Quote, RegistryError> {
    if request.is_cross_chain() {
      return self.bridge_quote(request).await;
    }

    let req = Arc::new(request.clone());
    let op = move |adapter: Arc<dyn ChainAdapter>| -> AdapterCall<Quote> {
      let req = Arc::clone(&req);
      async move { adapter.get_quote(&req.from.symbol, &req.to.symbol, req.amount).await }.boxed()
    };

    self.execute_protected(&request.from.chain_id, GET_QUOTE, use_fallback, &op, &accept_any)
      .await
  }

  /// Execute a trade on the order's chain. Trades never fall back.
  pub async fn execute_trade(&self, order: &TradeOrder) -> Result<TradeResult, RegistryError> {
    let shared = Arc::new(order.clone());
    let op = move |adapter: Arc<dyn ChainAdapter>| -> AdapterCall<TradeResult> {
      let order = Arc::clone(&shared);
      async move { adapter.execute_trade(&order).await }.boxed()
    };

    let result = self
      .execute_protected(&order.chain_id, EXECUTE_TRADE, false, &op, &accept_any)
      .await?;

    if let Ok(entry) = self.entry(&order.chain_id) {
      entry.stats.lock().traded_volume += result.executed_amount;
    }
    info!(
      chain = %order.chain_id,
      order_id = %order.id,
      tx_id = %result.tx_id,
      side = %order.side,
      amount = %result.executed_amount,
      "Trade executed"
    );
    Ok(result)
  }

  /// Status of a transaction on `chain_id`. Transaction ids are chain
  /// specific, so this never falls back.
  pub async fn get_transaction_status(
    &self,
    chain_id: &ChainId,
    tx_id: &str,
  ) -> Result<TransactionStatus, RegistryError> {
    let tx_id: Arc<str> = Arc::from(tx_id);
    let op = move |adapter: Arc<dyn ChainAdapter>| -> AdapterCall<TransactionStatus> {
      let tx_id = Arc::clone(&tx_id);
      async move { adapter.get_transaction_status(&tx_id).await }.boxed()
    };

    self.execute_protected(chain_id, GET_TRANSACTION_STATUS, false, &op, &accept_any)
      .await
  }

  /// Run an arbitrary operation on `chain_id` through the breaker, the
  /// timeout and the retry loop, falling back once if allowed.
  ///
  /// `op` may be invoked several times (retries, fallback) and is
  /// handed the adapter of whichever chain is being tried.
  pub async fn execute_chain_operation<T, F>(
    &self,
    chain_id: &ChainId,
    operation: &str,
    allow_fallback: bool,
    op: F,
  ) -> Result<T, RegistryError>
  where
    T: Send + 'static,
    F: Fn(Arc<dyn ChainAdapter>) -> AdapterCall<T> + Send + Sync,
  {
    self.execute_protected(chain_id, operation, allow_fallback, &op, &accept_any)
      .await
  }

  async fn execute_protected<T, F, V>(
    &self,
    chain_id: &ChainId,
    operation: &str,
    allow_fallback: bool,
    op: &F,
    validate: &V,
  ) -> Result<T, RegistryError>
  where
    T: Send + 'static,
    F: Fn(Arc<dyn ChainAdapter>) -> AdapterCall<T> + Send + Sync,
    V: Fn(&T) -> bool + Send + Sync,
  {
    let entry = self.entry(chain_id)?;
    let err = match self.run_on_chain(&entry, operation, op, validate).await {
      Ok(value) => return Ok(value),
      Err(e) => e,
    };

    if !(allow_fallback && self.config.use_fallback_chains && err.allows_fallback()) {
      return Err(err);
    }
    let Some(fallback_id) = self.fallback_for(chain_id) else {
      return Err(err);
    };
    let Ok(fallback) = self.entry(&fallback_id) else {
      warn!(chain = %chain_id, fallback = %fallback_id, "Fallback chain vanished, not rerouting");
      return Err(err);
    };

    self.totals.fallbacks.fetch_add(1, Ordering::Relaxed);
    warn!(
      chain = %chain_id,
      fallback = %fallback_id,
      operation,
      error = %err,
      "Primary chain failed, trying fallback"
    );

    // Exactly one hop: the fallback's own fallback is never consulted.
    match self.run_on_chain(&fallback, operation, op, validate).await {
      Ok(value) => {
        info!(chain = %chain_id, fallback = %fallback_id, operation, "Fallback succeeded");
        Ok(value)
      }
      Err(fallback_err) => {
        warn!(
          chain = %chain_id,
          fallback = %fallback_id,
          operation,
          error = %fallback_err,
          "Fallback failed"
        );
        Err(fallback_err)
      }
    }
  }

  async fn run_on_chain<T, F, V>(
    &self,
    entry: &ChainEntry,
    operation: &str,
    op: &F,
    validate: &V,
  ) -> Result<T, RegistryError>
  where
    T: Send + 'static,
    F: Fn(Arc<dyn ChainAdapter>) -> AdapterCall<T> + Send + Sync,
    V: Fn(&T) -> bool + Send + Sync,
  {
    let call = InFlight::begin(entry, &self.totals, &self.metrics, operation);

    let result = entry
      .breaker
      .execute(|| async {
        let attempts = entry.retry.execute_with_result_validation(
          operation,
          || op(Arc::clone(&entry.adapter)),
          validate,
        );
        match tokio::time::timeout(entry.timeout, attempts).await {
          Ok(outcome) => outcome.map(|o| o.value),
          Err(_) => Err(RegistryError::Timeout {
            chain_id: entry.id().clone(),
            operation: operation.to_string(),
            timeout: entry.timeout,
          }),
        }
      })
      .await;

    match &result {
      Ok(_) => {
        // Explicit record after `execute`: a successful half-open probe counts twice.
        entry.breaker.record_success();
        call.succeed();
      }
      Err(e) => call.fail(e),
    }
    result
  }

  async fn bridge_quote(&self, request: &QuoteRequest) -> Result<Quote, RegistryError> {
    let src = self.entry(&request.from.chain_id)?;
    let dst = self.entry(&request.to.chain_id)?;

    let src_call = InFlight::begin(&src, &self.totals, &self.metrics, GET_BRIDGE_QUOTE);
    let dst_call = InFlight::begin(&dst, &self.totals, &self.metrics, GET_BRIDGE_QUOTE);

    let quoted = src
      .adapter
      .get_quote(&request.from.symbol, &request.to.symbol, request.amount);
    let result = match tokio::time::timeout(src.timeout, quoted).await {
      Ok(Ok(quote)) => Ok(self.apply_bridge_fee(quote, request)),
      Ok(Err(source)) => Err(RegistryError::NonRetriable {
        chain_id: src.id().clone(),
        operation: GET_BRIDGE_QUOTE.to_string(),
        source,
      }),
      Err(_) => Err(RegistryError::Timeout {
        chain_id: src.id().clone(),
        operation: GET_BRIDGE_QUOTE.to_string(),
        timeout: src.timeout,
      }),
    };

    match &result {
      Ok(quote) => {
        debug!(
          from = %request.from,
          to = %request.to,
          expected_output = %quote.expected_output,
          "Bridge quote"
        );
        src_call.succeed();
        dst_call.succeed();
      }
      Err(e) => {
        warn!(from = %request.from, to = %request.to, error = %e, "Bridge quote failed");
        src_call.fail(e);
        dst_call.fail(e);
      }
    }
    result
  }

  fn apply_bridge_fee(&self, mut quote: Quote, request: &QuoteRequest) -> Quote {
    let fee = quote.expected_output * Decimal::from(self.config.bridge_fee_bps) / dec!(10000);
    quote.expected_output -= fee;
    quote.route.insert(
      0,
      format!("bridge:{}->{}", request.from.chain_id, request.to.chain_id),
    );
    quote
  }

  // ────────────────────────────────────────────
  // Breakers and metrics
  // ────────────────────────────────────────────

  /// Snapshot of one chain's circuit breaker.
  pub fn circuit_breaker_for_chain(&self, chain_id: &ChainId) -> Result<CircuitBreakerSnapshot, RegistryError> {
    Ok(self.entry(chain_id)?.breaker.snapshot())
  }

  /// Operator override: force a chain's breaker closed.
  pub fn reset_circuit_breaker(&self, chain_id: &ChainId) -> Result<(), RegistryError> {
    self.entry(chain_id)?.breaker.force_reset();
    Ok(())
  }

  /// Ready when initialized and at least one chain can take traffic.
  pub fn is_ready(&self) -> bool {
    self.is_initialized()
      && self
        .entries()
        .iter()
        .any(|entry| entry.breaker.state() != CircuitState::Open)
  }

  /// Current counters for every chain plus registry totals.
  pub fn get_metrics(&self) -> RegistryMetrics {
    let mut entries = self.entries();
    entries.sort_by(|a, b| a.id().cmp(b.id()));

    let chains = entries
      .iter()
      .map(|entry| {
        let breaker = entry.breaker.snapshot();
        let stats = entry.stats.lock();
        let completed = stats.successes + stats.failures;
        let (success_rate, average_latency_ms) = if completed == 0 {
          (1.0, 0.0)
        } else {
          (
            stats.successes as f64 / completed as f64,
            stats.total_latency.as_secs_f64() * 1_000.0 / completed as f64,
          )
        };
        ChainMetrics {
          chain_id: entry.id().clone(),
          name: entry.config.name.clone(),
          circuit_state: breaker.state,
          failure_count: breaker.failure_count,
          open_count: breaker.open_count,
          last_error: stats.last_error.clone(),
          last_failure_at: stats.last_failure_at,
          requests: stats.requests,
          successes: stats.successes,
          failures: stats.failures,
          success_rate,
          average_latency_ms,
          traded_volume: stats.traded_volume,
          queue_depth: entry.queue_depth.load(Ordering::Acquire),
          retries: entry.retry.lifetime_retries(),
          fallback: self.fallback_for(entry.id()),
          adapter_status: stats.status.clone(),
        }
      })
      .collect();

    let total_retries = self.totals.retired_retries.load(Ordering::Relaxed)
      + entries
        .iter()
        .map(|entry| entry.retry.lifetime_retries())
        .sum::<u64>();
    let (last_error, last_failure_at) = self
      .totals
      .last_failure
      .lock()
      .clone()
      .map_or((None, None), |(message, at)| (Some(message), Some(at)));

    RegistryMetrics {
      initialized: self.is_initialized(),
      total_requests: self.totals.requests.load(Ordering::Relaxed),
      total_successes: self.totals.successes.load(Ordering::Relaxed),
      total_failures: self.totals.failures.load(Ordering::Relaxed),
      total_retries,
      fallback_attempts: self.totals.fallbacks.load(Ordering::Relaxed),
      last_error,
      last_failure_at,
      chains,
    }
  }

  fn entry(&self, chain_id: &ChainId) -> Result<Arc<ChainEntry>, RegistryError> {
    self.chains
      .read()
      .get(chain_id)
      .cloned()
      .ok_or_else(|| RegistryError::UnknownChain(chain_id.clone()))
  }

  fn entries(&self) -> Vec<Arc<ChainEntry>> {
    self.chains.read().values().cloned().collect()
  }
}

impl Drop for AdapterRegistry {
  fn drop(&mut self) {
    if let Some(task) = self.health_task.get_mut().take() {
      task.abort();
    }
  }
}

async fn health_loop(
  registry: Weak<AdapterRegistry>,
  interval: Duration,
  mut shutdown_rx: broadcast::Receiver<()>,
) {
  let mut ticker = tokio::time::interval(interval);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
  // First tick completes immediately; initialize just connected everything.
  ticker.tick().await;

  loop {
    tokio::select! {
      _ = shutdown_rx.recv() => break,
      _ = ticker.tick() => {}
    }

    let Some(registry) = registry.upgrade() else {
      break;
    };
    tokio::select! {
      _ = shutdown_rx.recv() => break,
      _ = registry.run_health_check() => {}
    }
  }

  debug!("Health-check loop stopped");
}

/// Accounting for one call on one chain.
///
/// Counts the request and raises queue depth on creation. Settling it
/// counts the outcome; dropping it unsettled (the caller's future was
/// cancelled) counts a failure. Queue depth is lowered on drop either way.
struct InFlight<'a> {
  entry: &'a ChainEntry,
  totals: &'a RegistryTotals,
  metrics: &'a MetricsHandle,
  operation: &'a str,
  started: Instant,
  settled: bool,
}

impl<'a> InFlight<'a> {
  fn begin(
    entry: &'a ChainEntry,
    totals: &'a RegistryTotals,
    metrics: &'a MetricsHandle,
    operation: &'a str,
  ) -> Self {
    totals.requests.fetch_add(1, Ordering::Relaxed);
    entry.stats.lock().requests += 1;
    let depth = entry.queue_depth.fetch_add(1, Ordering::AcqRel) + 1;
    metrics.update_queue_depth(entry.id(), depth);

    Self {
      entry,
      totals,
      metrics,
      operation,
      started: Instant::now(),
      settled: false,
    }
  }

  fn succeed(mut self) {
    self.settle(None);
  }

  fn fail(mut self, error: &RegistryError) {
    self.settle(Some((error.kind(), error.to_string())));
  }

  fn settle(&mut self, failure: Option<(&'static str, String)>) {
    self.settled = true;
    let latency = self.started.elapsed();
    let error_type = failure.as_ref().map(|(kind, _)| *kind);

    {
      let mut stats = self.entry.stats.lock();
      stats.total_latency += latency;
      match failure {
        None => stats.successes += 1,
        Some((_, message)) => {
          let now = Utc::now();
          stats.failures += 1;
          stats.last_error = Some(message.clone());
          stats.last_failure_at = Some(now);
          *self.totals.last_failure.lock() = Some((message, now));
        }
      }
    }

    if error_type.is_none() {
      self.totals.successes.fetch_add(1, Ordering::Relaxed);
    } else {
      self.totals.failures.fetch_add(1, Ordering::Relaxed);
    }
    self.metrics.record_operation(
      self.entry.id(),
      self.operation,
      self.started,
      error_type.is_none(),
      error_type,
    );
  }
}

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    if !self.settled {
      debug!(chain = %self.entry.id(), operation = self.operation, "Call cancelled before completion");
      self.settle(Some(("cancelled", "operation cancelled".to_string())));
    }

    let previous = self
      .entry
      .queue_depth
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| {
        Some(depth.saturating_sub(1))
      })
      .unwrap_or_default();
    self.metrics
      .update_queue_depth(self.entry.id(), previous.saturating_sub(1));
  }
}

fn accept_any<T>(_: &T) -> bool {
  true
}

fn parse_balance(raw: &str) -> Option<Decimal> {
  Decimal::from_str(raw.trim())
    .ok()
    .filter(|balance| *balance >= Decimal::ZERO)
}
