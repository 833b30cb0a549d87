//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the usecases layer requires from
//! the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `ChainAdapter` / `AdapterFactory`: per-chain RPC clients
//! - `MetricsSink`: best-effort telemetry output

pub mod chain_adapter;
pub mod metrics_sink;

pub use chain_adapter::{AdapterFactory, ChainAdapter};
pub use metrics_sink::MetricsSink;
