//! Chain-facing domain types.
//!
//! Defines the identifiers and value objects that flow between callers,
//! the registry and the chain adapters: chain ids, asset references,
//! quotes, trade orders and their results, and adapter status reports.
//!
//! Amounts use `Decimal` so that balances and quotes never pass through
//! binary floating point inside the registry.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────
// Identifiers
// ────────────────────────────────────────────

/// Opaque identifier of a blockchain network.
///
/// Numeric EVM chain ids and symbolic names (`"solana"`, `"polkadot"`)
/// are both accepted; the registry only compares them for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    /// Create a chain id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice (used for metric labels).
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Config files write EVM chains as bare integers (`id = 137`).
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Numeric(u64),
            Named(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Numeric(id) => Self::from(id),
            Raw::Named(id) => Self(id),
        })
    }
}

impl From<&str> for ChainId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ChainId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// An asset living on a specific chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetRef {
    /// Chain the asset lives on.
    pub chain_id: ChainId,
    /// Token symbol or contract address.
    pub symbol: String,
}

impl AssetRef {
    pub fn new(chain_id: impl Into<ChainId>, symbol: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            symbol: symbol.into(),
        }
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.chain_id)
    }
}

// ────────────────────────────────────────────
// Quotes
// ────────────────────────────────────────────

/// A request for a price quote between two assets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRequest {
    /// Asset being sold.
    pub from: AssetRef,
    /// Asset being bought.
    pub to: AssetRef,
    /// Amount of `from` to sell.
    pub amount: Decimal,
}

impl QuoteRequest {
    pub fn new(from: AssetRef, to: AssetRef, amount: Decimal) -> Self {
        Self { from, to, amount }
    }

    /// Whether source and destination assets live on different chains.
    pub fn is_cross_chain(&self) -> bool {
        self.from.chain_id != self.to.chain_id
    }
}

/// A price quote returned by an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Amount of the destination asset expected for the input amount.
    pub expected_output: Decimal,
    /// Price impact as a fraction (0.01 = 1%).
    pub price_impact: Decimal,
    /// Ordered hops the trade would take, if the adapter reports them.
    #[serde(default)]
    pub route: Vec<String>,
}

// ────────────────────────────────────────────
// Trades
// ────────────────────────────────────────────

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// An order to execute on a single chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeOrder {
    /// Caller-assigned order id.
    pub id: String,
    /// Chain the order executes on.
    pub chain_id: ChainId,
    /// Asset given up.
    pub from_asset: String,
    /// Asset received.
    pub to_asset: String,
    /// Input amount.
    pub amount: Decimal,
    /// Buy or sell.
    pub side: TradeSide,
    /// Maximum tolerated slippage in basis points.
    pub max_slippage_bps: u32,
}

/// Result of an executed trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeResult {
    /// Order id echoed back.
    pub order_id: String,
    /// Transaction hash / signature on the chain.
    pub tx_id: String,
    /// Filled output amount.
    pub executed_amount: Decimal,
    /// Effective execution price.
    pub executed_price: Decimal,
    /// Network fee paid, in the chain's native unit.
    pub fee: Decimal,
}

/// Lifecycle of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Pending,
    Confirmed,
    Failed,
    NotFound,
}

/// Status report for a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub state: TransactionState,
    pub confirmations: Option<u64>,
    pub block_number: Option<u64>,
}

// ────────────────────────────────────────────
// Adapter status
// ────────────────────────────────────────────

/// Connection status reported by an adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdapterStatus {
    /// Whether the adapter currently holds a live connection.
    pub is_connected: bool,
    /// Latest block height seen by the adapter.
    pub block_height: Option<u64>,
    /// Current gas price in gwei (or the chain's equivalent unit).
    pub gas_price: Option<f64>,
    /// Recent adapter-level errors, newest last.
    #[serde(default)]
    pub errors: Vec<String>,
}
