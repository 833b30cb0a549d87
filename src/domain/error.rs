//! Error taxonomy for protected chain operations.
//!
//! `RpcError` is raised by adapters to carry a transport or JSON-RPC
//! status code through `anyhow`. `RegistryError` is what callers of the
//! registry receive: every variant names the chain, and where relevant the
//! operation and number of attempts, so a caller can tell an unhealthy
//! chain from bad input or a hung call.

use std::time::Duration;

use thiserror::Error;

use super::chain::ChainId;

/// A coded failure reported by a chain endpoint.
///
/// `code` is either an HTTP status (429, 502, ...) or a JSON-RPC error
/// code (-32603, -32005, ...). The classifier inspects it before falling
/// back to message matching.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("RPC error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Errors returned by the adapter registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The chain's circuit breaker is open; the adapter was not called.
    #[error("circuit breaker open for chain {chain_id}, retry after {}ms (last error: {})",
        .retry_after.as_millis(), .last_error.as_deref().unwrap_or("none"))]
    CircuitOpen {
        chain_id: ChainId,
        retry_after: Duration,
        last_error: Option<String>,
    },

    /// A transient failure persisted through every allowed retry.
    #[error("{operation} on chain {chain_id} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        chain_id: ChainId,
        operation: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// A failure the classifier does not consider transient.
    #[error("{operation} on chain {chain_id} failed: {source}")]
    NonRetriable {
        chain_id: ChainId,
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    /// Calls kept succeeding but their results never passed validation.
    #[error("{operation} on chain {chain_id} failed validation after all retry attempts ({attempts})")]
    ValidationFailed {
        chain_id: ChainId,
        operation: String,
        attempts: u32,
    },

    /// The protected call exceeded its deadline.
    #[error("{operation} on chain {chain_id} timed out after {}ms", .timeout.as_millis())]
    Timeout {
        chain_id: ChainId,
        operation: String,
        timeout: Duration,
    },

    /// The chain was never registered (or has been deregistered).
    #[error("chain {0} is not registered")]
    UnknownChain(ChainId),

    /// A fallback relation that cannot be honoured.
    #[error("invalid fallback {primary} -> {fallback}: {reason}")]
    InvalidFallback {
        primary: ChainId,
        fallback: ChainId,
        reason: String,
    },

    /// The adapter factory could not build an adapter for the chain.
    #[error("failed to create adapter for chain {chain_id}: {source}")]
    AdapterCreation {
        chain_id: ChainId,
        #[source]
        source: anyhow::Error,
    },
}

impl RegistryError {
    /// Chain the error refers to (the primary chain for fallback errors).
    pub fn chain_id(&self) -> &ChainId {
        match self {
            Self::CircuitOpen { chain_id, .. }
            | Self::RetriesExhausted { chain_id, .. }
            | Self::NonRetriable { chain_id, .. }
            | Self::ValidationFailed { chain_id, .. }
            | Self::Timeout { chain_id, .. }
            | Self::AdapterCreation { chain_id, .. } => chain_id,
            Self::UnknownChain(chain_id) => chain_id,
            Self::InvalidFallback { primary, .. } => primary,
        }
    }

    /// Number of adapter invocations made before the error was raised.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetriesExhausted { attempts, .. } | Self::ValidationFailed { attempts, .. } => {
                Some(*attempts)
            }
            Self::NonRetriable { .. } => Some(1),
            Self::CircuitOpen { .. } => Some(0),
            _ => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Whether a protected call that ended in this error may be rerouted
    /// to the chain's fallback. Registration errors are caller mistakes.
    pub fn allows_fallback(&self) -> bool {
        !matches!(
            self,
            Self::UnknownChain(_) | Self::InvalidFallback { .. } | Self::AdapterCreation { .. }
        )
    }

    /// Short label used for metrics (`error_type`).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "circuit_open",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::NonRetriable { .. } => "non_retriable",
            Self::ValidationFailed { .. } => "validation_failed",
            Self::Timeout { .. } => "timeout",
            Self::UnknownChain(_) => "unknown_chain",
            Self::InvalidFallback { .. } => "invalid_fallback",
            Self::AdapterCreation { .. } => "adapter_creation",
        }
    }
}
