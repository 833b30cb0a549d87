//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! infrastructure. Each sub-module groups adapters by concern.
//!
//! Adapter categories:
//! - `metrics`: Prometheus metrics sink and the status HTTP server
//! - `simulated`: In-process chain adapters with failure injection

pub mod metrics;
pub mod simulated;
