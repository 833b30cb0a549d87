//! Domain layer - Core types and pure reliability policies.
//!
//! This module contains the pure logic of the registry: chain value
//! objects, the error taxonomy, the error classifier and the backoff
//! delay math. Nothing here performs I/O or touches the runtime
//! (hexagonal architecture inner ring), so all of it is testable in
//! isolation.

pub mod backoff;
pub mod chain;
pub mod classifier;
pub mod error;

// Re-export core types for convenience
pub use backoff::BackoffPolicy;
pub use chain::{
    AdapterStatus, AssetRef, ChainId, Quote, QuoteRequest, TradeOrder, TradeResult, TradeSide,
    TransactionState, TransactionStatus,
};
pub use classifier::{ErrorClass, classify, is_retriable};
pub use error::{RegistryError, RpcError};
