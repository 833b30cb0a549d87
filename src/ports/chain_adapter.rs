//! Chain Adapter Port - Per-chain RPC Client Interface
//!
//! Defines the trait every concrete chain client (EVM, Solana,
//! Polkadot, cross-chain SDK wrappers) implements, plus the factory the
//! registry uses to build one adapter per registered chain.
//!
//! Adapters report failures as `anyhow::Error`. When the endpoint returns
//! a status code, wrap it in `RpcError` so the classifier can see it.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::config::ChainConfig;
use crate::domain::chain::{AdapterStatus, Quote, TradeOrder, TradeResult, TransactionStatus};

/// Trait for a single chain's RPC client.
///
/// One instance is owned by exactly one registry entry; the registry
/// never shares an adapter between chains. Implementations must be safe
/// to call concurrently.
#[async_trait]
pub trait ChainAdapter: Send + Sync + 'static {
  /// Prepare the adapter (load ABIs, warm caches, validate config).
  async fn initialize(&self) -> anyhow::Result<()>;

  /// Open the connection to the chain endpoint.
  async fn connect(&self) -> anyhow::Result<()>;

  /// Close the connection. Must be safe to call when not connected.
  async fn disconnect(&self) -> anyhow::Result<()>;

  /// Native or token balance of `address`, as a decimal string.
  async fn get_balance(&self, address: &str) -> anyhow::Result<String>;

  /// Price quote for swapping `amount` of `from_asset` into `to_asset`.
  async fn get_quote(
    &self,
    from_asset: &str,
    to_asset: &str,
    amount: Decimal,
  ) -> anyhow::Result<Quote>;

  /// Submit a trade on this chain.
  async fn execute_trade(&self, order: &TradeOrder) -> anyhow::Result<TradeResult>;

  /// Look up a previously submitted transaction.
  async fn get_transaction_status(&self, tx_id: &str) -> anyhow::Result<TransactionStatus>;

  /// Current connection status, block height and gas price.
  async fn get_status(&self) -> anyhow::Result<AdapterStatus>;
}

/// Builds adapters for newly registered chains.
pub trait AdapterFactory: Send + Sync + 'static {
  /// Create the adapter for `chain`. Called once per registration.
  ///
  /// # Errors
  /// Returns error if the chain's adapter settings are unusable.
  fn create_adapter(&self, chain: &ChainConfig) -> anyhow::Result<Arc<dyn ChainAdapter>>;
}
