//! Simulated Chain Adapter - In-process Stand-in for RPC Clients
//!
//! Behaves like a remote chain endpoint without a network:
//! configurable latency, random failures at `failure_rate`, a
//! governor-backed request quota that answers `429` when exceeded, a
//! connection flag, and a block height that advances on every status
//! query. Failures can be injected and cleared at runtime, which is what
//! the binary's demo chains and the integration tests rely on.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::AdapterSettings;
use crate::domain::chain::{
    AdapterStatus, ChainId, Quote, TradeOrder, TradeResult, TransactionState, TransactionStatus,
};
use crate::domain::error::RpcError;
use crate::ports::chain_adapter::ChainAdapter;

/// Fee kept by the simulated swap venue.
const SWAP_FEE: Decimal = dec!(0.003);
/// Network fee charged per simulated trade.
const TRADE_FEE: Decimal = dec!(0.0001);
/// Block the simulated chain starts at.
const GENESIS_HEIGHT: u64 = 1_000_000;

/// In-process chain adapter driven by `AdapterSettings`.
pub struct SimulatedChainAdapter {
    chain_id: ChainId,
    settings: AdapterSettings,
    connected: AtomicBool,
    block_height: AtomicU64,
    calls: AtomicU64,
    injected_failure: Mutex<Option<String>>,
    /// Submitted transaction id → inclusion block.
    submitted: Mutex<HashMap<String, u64>>,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl SimulatedChainAdapter {
    pub fn new(chain_id: ChainId, settings: AdapterSettings) -> Self {
        let limiter = settings
            .requests_per_second
            .and_then(NonZeroU32::new)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));

        Self {
            chain_id,
            settings,
            connected: AtomicBool::new(false),
            block_height: AtomicU64::new(GENESIS_HEIGHT),
            calls: AtomicU64::new(0),
            injected_failure: Mutex::new(None),
            submitted: Mutex::new(HashMap::new()),
            limiter,
        }
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    /// Make every call (and `connect`) fail with `message` until cleared.
    pub fn inject_failure(&self, message: impl Into<String>) {
        let message = message.into();
        info!(chain = %self.chain_id, error = %message, "Failure injected");
        *self.injected_failure.lock() = Some(message);
    }

    pub fn clear_failure(&self) {
        info!(chain = %self.chain_id, "Injected failure cleared");
        *self.injected_failure.lock() = None;
    }

    /// Flip the connection flag without going through `connect`.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Chain operations attempted so far (lifecycle and status calls excluded).
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Shared prologue of every chain operation.
    async fn simulate(&self, call: &'static str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.delay().await;

        if let Some(limiter) = &self.limiter {
            if limiter.check().is_err() {
                debug!(chain = %self.chain_id, call, "Request quota exceeded");
                return Err(RpcError::new(429, "too many requests").into());
            }
        }
        if let Some(message) = self.injected_failure.lock().clone() {
            anyhow::bail!(message);
        }
        let rate = self.settings.failure_rate.clamp(0.0, 1.0);
        if rate > 0.0 && rand::thread_rng().gen_bool(rate) {
            anyhow::bail!(self.settings.failure_message.clone());
        }
        if !self.is_connected() {
            anyhow::bail!("adapter disconnected");
        }
        Ok(())
    }

    async fn delay(&self) {
        if self.settings.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.settings.latency_ms)).await;
        }
    }
}

#[async_trait]
impl ChainAdapter for SimulatedChainAdapter {
    async fn initialize(&self) -> Result<()> {
        debug!(chain = %self.chain_id, rpc_url = ?self.settings.rpc_url, "Simulated adapter initialized");
        Ok(())
    }

    async fn connect(&self) -> Result<()> {
        self.delay().await;
        if let Some(message) = self.injected_failure.lock().clone() {
            anyhow::bail!("connect failed: {message}");
        }
        self.set_connected(true);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.set_connected(false);
        Ok(())
    }

    async fn get_balance(&self, _address: &str) -> Result<String> {
        self.simulate("getBalance").await?;
        Ok(self.settings.balance.clone())
    }

    async fn get_quote(&self, from_asset: &str, to_asset: &str, amount: Decimal) -> Result<Quote> {
        self.simulate("getQuote").await?;
        Ok(Quote {
            expected_output: amount * (Decimal::ONE - SWAP_FEE),
            price_impact: SWAP_FEE,
            route: vec![format!("{from_asset}->{to_asset}")],
        })
    }

    async fn execute_trade(&self, order: &TradeOrder) -> Result<TradeResult> {
        self.simulate("executeTrade").await?;
        let tx_id = format!("0x{}", Uuid::new_v4().simple());
        let block = self.block_height.fetch_add(1, Ordering::Relaxed) + 1;
        self.submitted.lock().insert(tx_id.clone(), block);

        let price = Decimal::ONE - SWAP_FEE;
        Ok(TradeResult {
            order_id: order.id.clone(),
            tx_id,
            executed_amount: order.amount * price,
            executed_price: price,
            fee: TRADE_FEE,
        })
    }

    async fn get_transaction_status(&self, tx_id: &str) -> Result<TransactionStatus> {
        self.simulate("getTransactionStatus").await?;
        let included = self.submitted.lock().get(tx_id).copied();
        let head = self.block_height.load(Ordering::Relaxed);

        Ok(match included {
            Some(block) => TransactionStatus {
                state: if head > block {
                    TransactionState::Confirmed
                } else {
                    TransactionState::Pending
                },
                confirmations: Some(head.saturating_sub(block)),
                block_number: Some(block),
            },
            None => TransactionStatus {
                state: TransactionState::NotFound,
                confirmations: None,
                block_number: None,
            },
        })
    }

    async fn get_status(&self) -> Result<AdapterStatus> {
        self.delay().await;
        let connected = self.is_connected();
        let block_height = if connected {
            Some(self.block_height.fetch_add(1, Ordering::Relaxed) + 1)
        } else {
            None
        };
        let errors = self.injected_failure.lock().clone().into_iter().collect();

        Ok(AdapterStatus {
            is_connected: connected,
            block_height,
            gas_price: self.settings.gas_price_gwei,
            errors,
        })
    }
}
