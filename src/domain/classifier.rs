//! Error Classifier - Transient vs Terminal Failures
//!
//! Decides whether a failed adapter call is worth retrying. Rules are
//! applied in priority order and the first match wins:
//!
//! 1. The circuit breaker itself is open: terminal, always.
//! 2. A known transient RPC/HTTP status code: retriable.
//! 3. Network-failure vocabulary in the message: retriable.
//! 4. Transient transaction-submission conditions: retriable.
//! 5. Anything else: terminal, so programming errors are never masked as
//!    flaky network conditions.
//!
//! Every error in the `anyhow` cause chain is inspected, so adapters may
//! wrap an `RpcError` with extra context without hiding its code.

use serde::Serialize;

use super::error::{RegistryError, RpcError};

/// Transient status codes: rate limited, internal error, bad gateway,
/// service unavailable, gateway timeout, and the JSON-RPC equivalents
/// (internal error, limit exceeded, method-limit exceeded).
const TRANSIENT_CODES: &[i64] = &[429, 500, 502, 503, 504, -32603, -32005, -32016, -32098];

const CIRCUIT_OPEN_MARKERS: &[&str] = &["circuit breaker open", "circuit breaker is open", "circuit open"];

const NETWORK_MARKERS: &[&str] = &[
    "econnreset",
    "connection reset",
    "connection refused",
    "connection closed",
    "etimedout",
    "timed out",
    "timeout",
    "disconnected",
    "socket hang up",
    "socket error",
    "network error",
    "overloaded",
    "temporarily unavailable",
    "service unavailable",
    "rate limit",
    "too many requests",
    "try again",
];

const TRANSACTION_MARKERS: &[&str] = &[
    "nonce too low",
    "nonce conflict",
    "nonce has already been used",
    "replacement transaction underpriced",
    "transaction underpriced",
    "underpriced",
    "gas price too low",
    "already known",
];

/// Outcome of classifying a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The breaker rejected the call; never retried.
    CircuitOpen,
    /// Transient status code reported by the endpoint.
    TransientRpc,
    /// Connection-level failure.
    Network,
    /// Transaction submission raced with chain state.
    TransactionConflict,
    /// Unrecognised failure.
    Terminal,
}

impl ErrorClass {
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::TransientRpc | Self::Network | Self::TransactionConflict)
    }

    /// Metric label for this class.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CircuitOpen => "circuit_open",
            Self::TransientRpc => "transient_rpc",
            Self::Network => "network",
            Self::TransactionConflict => "transaction_conflict",
            Self::Terminal => "terminal",
        }
    }
}

/// Classify an error by walking its full cause chain.
pub fn classify(error: &anyhow::Error) -> ErrorClass {
    // Rule 1 must win over every other rule anywhere in the chain.
    let breaker_open = error.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<RegistryError>(),
            Some(RegistryError::CircuitOpen { .. })
        )
    });
    if breaker_open {
        return ErrorClass::CircuitOpen;
    }

    let messages: Vec<String> = error
        .chain()
        .map(|cause| cause.to_string().to_lowercase())
        .collect();

    if messages.iter().any(|m| contains_any(m, CIRCUIT_OPEN_MARKERS)) {
        return ErrorClass::CircuitOpen;
    }

    let transient_code = error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<RpcError>())
        .any(|rpc| is_transient_code(rpc.code));
    if transient_code {
        return ErrorClass::TransientRpc;
    }

    classify_messages(&messages)
}

/// Classify a bare error message (no structured code available).
pub fn classify_message(message: &str) -> ErrorClass {
    let lowered = message.to_lowercase();
    if contains_any(&lowered, CIRCUIT_OPEN_MARKERS) {
        return ErrorClass::CircuitOpen;
    }
    classify_messages(std::slice::from_ref(&lowered))
}

/// Whether the failure is transient and worth another attempt.
pub fn is_retriable(error: &anyhow::Error) -> bool {
    classify(error).is_retriable()
}

/// Whether a status code denotes a transient endpoint condition.
pub fn is_transient_code(code: i64) -> bool {
    TRANSIENT_CODES.contains(&code)
}

fn classify_messages(lowered: &[String]) -> ErrorClass {
    if lowered.iter().any(|m| contains_any(m, NETWORK_MARKERS)) {
        ErrorClass::Network
    } else if lowered.iter().any(|m| contains_any(m, TRANSACTION_MARKERS)) {
        ErrorClass::TransactionConflict
    } else {
        ErrorClass::Terminal
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::{Context, anyhow};

    use super::*;
    use crate::domain::chain::ChainId;

    #[test]
    fn test_circuit_open_is_never_retriable() {
        let err = anyhow::Error::new(RegistryError::CircuitOpen {
            chain_id: ChainId::from("1"),
            retry_after: Duration::from_secs(5),
            last_error: Some("network timeout".to_string()),
        });
        // The embedded last error mentions a timeout, rule 1 still wins.
        assert_eq!(classify(&err), ErrorClass::CircuitOpen);
        assert!(!is_retriable(&err));
    }

    #[test]
    fn test_circuit_open_message_is_never_retriable() {
        let err = anyhow!("Circuit breaker open for ethereum, try again later");
        assert_eq!(classify(&err), ErrorClass::CircuitOpen);
    }

    #[test]
    fn test_transient_rpc_codes() {
        for code in [429, 502, 503, 504, -32603, -32005] {
            let err = anyhow::Error::new(RpcError::new(code, "upstream said no"));
            assert_eq!(classify(&err), ErrorClass::TransientRpc, "code {code}");
        }
    }

    #[test]
    fn test_non_transient_rpc_code_falls_through_to_message() {
        let err = anyhow::Error::new(RpcError::new(-32602, "invalid params"));
        assert_eq!(classify(&err), ErrorClass::Terminal);
    }

    #[test]
    fn test_rpc_code_found_behind_context() {
        let err = Err::<(), _>(RpcError::new(503, "maintenance"))
            .context("eth_getBalance failed")
            .unwrap_err();
        assert!(is_retriable(&err));
    }

    #[test]
    fn test_network_vocabulary() {
        for msg in [
            "network timeout",
            "ECONNRESET while reading",
            "request timed out after 30s",
            "websocket disconnected",
            "node is overloaded",
            "resource temporarily unavailable",
            "please try again",
        ] {
            assert_eq!(classify(&anyhow!("{msg}")), ErrorClass::Network, "{msg}");
        }
    }

    #[test]
    fn test_transaction_conflicts() {
        for msg in [
            "nonce too low",
            "replacement transaction underpriced",
            "gas price too low to replace",
            "already known",
        ] {
            assert_eq!(
                classify(&anyhow!("{msg}")),
                ErrorClass::TransactionConflict,
                "{msg}"
            );
        }
    }

    #[test]
    fn test_unknown_errors_fail_closed() {
        for msg in ["invalid address checksum", "insufficient funds", "index out of bounds"] {
            assert!(!is_retriable(&anyhow!("{msg}")), "{msg}");
        }
    }

    #[test]
    fn test_classify_message_matches_classify() {
        assert_eq!(classify_message("Connection reset by peer"), ErrorClass::Network);
        assert_eq!(classify_message("circuit open"), ErrorClass::CircuitOpen);
        assert_eq!(classify_message("bad input"), ErrorClass::Terminal);
    }
}
