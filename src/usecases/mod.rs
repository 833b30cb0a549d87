//! Use Cases Layer - Reliability Policies and the Adapter Registry
//!
//! Orchestrates domain logic with port interfaces to implement
//! protected multi-chain execution.
//!
//! Use cases:
//! - `CircuitBreaker`: Per-chain Closed/Open/HalfOpen state machine
//! - `RetryExecutor`: Classified retries with backoff
//! - `AdapterRegistry`: Chain bundles, fallback routing, health checks, metrics
//! - `MetricsHandle`: Optional, failure-swallowing telemetry port

pub mod circuit_breaker;
pub mod registry;
pub mod retry_executor;
pub mod telemetry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState};
pub use registry::{
  AdapterCall, AdapterRegistry, ChainFailure, ChainMetrics, HealthCheckReport,
  InitializationSummary, RegistryMetrics,
};
pub use retry_executor::{RetryExecutor, RetryOutcome, RetryPolicy};
pub use telemetry::MetricsHandle;
