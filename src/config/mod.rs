//! Configuration Module - TOML-based Registry Configuration
//!
//! Loads and validates configuration from `config.toml`.
//! Registry-wide reliability defaults live in `[registry]`; every
//! `[[chains]]` entry may override them and carries the adapter settings
//! handed to the adapter factory. Nothing chain-specific is hardcoded in
//! the usecases layer.

pub mod loader;

use serde::Deserialize;

use crate::domain::chain::ChainId;

/// Top-level service configuration.
///
/// Loaded from `config.toml` at startup. All fields are validated
/// before any chain is registered.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Service identity and logging.
  pub service: ServiceConfig,
  /// Prometheus and status endpoints.
  #[serde(default)]
  pub metrics: MetricsConfig,
  /// Registry-wide reliability defaults.
  #[serde(default)]
  pub registry: RegistryConfig,
  /// Chains to register at startup.
  #[serde(default)]
  pub chains: Vec<ChainConfig>,
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
  /// Human-readable service name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Prometheus metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
  /// Status server port (/live, /ready, /status).
  #[serde(default = "default_status_port")]
  pub status_port: u16,
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      bind_address: default_metrics_addr(),
      status_port: default_status_port(),
    }
  }
}

/// Registry-wide reliability defaults.
///
/// Every value here can be overridden per chain in `[[chains]]`.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
  /// Retries after the first attempt for a transient failure.
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  /// Delay before the first retry (milliseconds).
  #[serde(default = "default_retry_base_delay")]
  pub retry_base_delay_ms: u64,
  /// Upper bound for any retry delay (milliseconds).
  #[serde(default = "default_retry_max_delay")]
  pub retry_max_delay_ms: u64,
  /// Apply ±30% jitter to retry delays.
  #[serde(default = "default_true")]
  pub retry_jitter: bool,
  /// Exponential (true) or linear (false) delay growth.
  #[serde(default = "default_true")]
  pub retry_exponential: bool,
  /// Consecutive failures that open a chain's circuit breaker.
  #[serde(default = "default_breaker_threshold")]
  pub circuit_breaker_threshold: u32,
  /// How long an open breaker waits before probing (milliseconds).
  #[serde(default = "default_breaker_reset_timeout")]
  pub circuit_breaker_reset_timeout_ms: u64,
  /// Consecutive half-open successes that close the breaker.
  #[serde(default = "default_half_open_successes")]
  pub half_open_success_threshold: u32,
  /// Global gate on fallback routing, regardless of the per-call flag.
  #[serde(default = "default_true")]
  pub use_fallback_chains: bool,
  /// Publish telemetry to the metrics sink.
  #[serde(default = "default_true")]
  pub metrics_enabled: bool,
  /// Interval between health-check passes (milliseconds).
  #[serde(default = "default_health_interval")]
  pub health_check_interval_ms: u64,
  /// Deadline for one protected call, retries included (milliseconds).
  #[serde(default = "default_operation_timeout")]
  pub operation_timeout_ms: u64,
  /// Fee deducted from cross-chain quotes (basis points).
  #[serde(default = "default_bridge_fee_bps")]
  pub bridge_fee_bps: u32,
}

impl Default for RegistryConfig {
  fn default() -> Self {
    Self {
      max_retries: default_max_retries(),
      retry_base_delay_ms: default_retry_base_delay(),
      retry_max_delay_ms: default_retry_max_delay(),
      retry_jitter: true,
      retry_exponential: true,
      circuit_breaker_threshold: default_breaker_threshold(),
      circuit_breaker_reset_timeout_ms: default_breaker_reset_timeout(),
      half_open_success_threshold: default_half_open_successes(),
      use_fallback_chains: true,
      metrics_enabled: true,
      health_check_interval_ms: default_health_interval(),
      operation_timeout_ms: default_operation_timeout(),
      bridge_fee_bps: default_bridge_fee_bps(),
    }
  }
}

/// Individual chain configuration.
///
/// `None` overrides inherit the `[registry]` value.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
  /// Chain identifier (numeric EVM id or symbolic name).
  pub id: ChainId,
  /// Human-readable chain name.
  pub name: String,
  /// Chain to reroute to when a protected call here fails.
  pub fallback: Option<ChainId>,
  /// Per-chain retry override.
  pub max_retries: Option<u32>,
  /// Per-chain base delay override (milliseconds).
  pub retry_base_delay_ms: Option<u64>,
  /// Per-chain max delay override (milliseconds).
  pub retry_max_delay_ms: Option<u64>,
  /// Per-chain breaker threshold override.
  pub circuit_breaker_threshold: Option<u32>,
  /// Per-chain breaker reset timeout override (milliseconds).
  pub circuit_breaker_reset_timeout_ms: Option<u64>,
  /// Per-chain half-open success threshold override.
  pub half_open_success_threshold: Option<u32>,
  /// Per-chain operation timeout override (milliseconds).
  pub operation_timeout_ms: Option<u64>,
  /// Settings consumed by the adapter factory.
  #[serde(default)]
  pub adapter: AdapterSettings,
}

impl ChainConfig {
  /// Minimal chain entry inheriting every registry default.
  pub fn new(id: impl Into<ChainId>, name: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      fallback: None,
      max_retries: None,
      retry_base_delay_ms: None,
      retry_max_delay_ms: None,
      circuit_breaker_threshold: None,
      circuit_breaker_reset_timeout_ms: None,
      half_open_success_threshold: None,
      operation_timeout_ms: None,
      adapter: AdapterSettings::default(),
    }
  }
}

/// Adapter settings passed through to the adapter factory.
///
/// The simulated adapter reads all of these; concrete RPC clients
/// typically only need `rpc_url`.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterSettings {
  /// Adapter implementation to build.
  #[serde(default = "default_adapter_kind")]
  pub kind: String,
  /// RPC endpoint URL.
  pub rpc_url: Option<String>,
  /// Artificial latency per call (milliseconds).
  #[serde(default)]
  pub latency_ms: u64,
  /// Probability in [0, 1] that a call fails.
  #[serde(default)]
  pub failure_rate: f64,
  /// Message used for injected failures.
  #[serde(default = "default_failure_message")]
  pub failure_message: String,
  /// Request quota; excess calls fail with a 429.
  pub requests_per_second: Option<u32>,
  /// Balance reported for every address.
  #[serde(default = "default_balance")]
  pub balance: String,
  /// Gas price reported by the status call (gwei).
  pub gas_price_gwei: Option<f64>,
}

impl Default for AdapterSettings {
  fn default() -> Self {
    Self {
      kind: default_adapter_kind(),
      rpc_url: None,
      latency_ms: 0,
      failure_rate: 0.0,
      failure_message: default_failure_message(),
      requests_per_second: None,
      balance: default_balance(),
      gas_price_gwei: None,
    }
  }
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}

fn default_status_port() -> u16 {
  8080
}

fn default_max_retries() -> u32 {
  3
}

fn default_retry_base_delay() -> u64 {
  1_000
}

fn default_retry_max_delay() -> u64 {
  30_000
}

fn default_breaker_threshold() -> u32 {
  3
}

fn default_breaker_reset_timeout() -> u64 {
  30_000
}

fn default_half_open_successes() -> u32 {
  2
}

fn default_health_interval() -> u64 {
  60_000
}

fn default_operation_timeout() -> u64 {
  30_000
}

fn default_bridge_fee_bps() -> u32 {
  30
}

fn default_adapter_kind() -> String {
  "simulated".to_string()
}

fn default_failure_message() -> String {
  "network timeout".to_string()
}

fn default_balance() -> String {
  "0".to_string()
}
