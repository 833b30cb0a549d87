//! Metrics and Monitoring Adapters
//!
//! Provides Prometheus metrics export on :9090 and status endpoints
//! (/live, /ready, /status) via axum 0.7.

pub mod health;
pub mod prometheus;

pub use health::StatusServer;
pub use prometheus::PrometheusMetricsSink;
