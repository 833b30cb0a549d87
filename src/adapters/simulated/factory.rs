//! Builds simulated adapters and keeps a handle to each one so callers
//! can inject failures after the registry owns them.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::ChainConfig;
use crate::domain::chain::ChainId;
use crate::ports::chain_adapter::{AdapterFactory, ChainAdapter};

use super::adapter::SimulatedChainAdapter;

/// Adapter kind this factory understands (`adapter.kind` in config).
pub const SIMULATED_KIND: &str = "simulated";

#[derive(Default)]
pub struct SimulatedAdapterFactory {
    created: Mutex<HashMap<ChainId, Arc<SimulatedChainAdapter>>>,
}

impl SimulatedAdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The adapter most recently built for `chain_id`.
    pub fn adapter(&self, chain_id: &ChainId) -> Option<Arc<SimulatedChainAdapter>> {
        self.created.lock().get(chain_id).cloned()
    }
}

impl AdapterFactory for SimulatedAdapterFactory {
    fn create_adapter(&self, chain: &ChainConfig) -> Result<Arc<dyn ChainAdapter>> {
        anyhow::ensure!(
            chain.adapter.kind == SIMULATED_KIND,
            "unsupported adapter kind '{}' for chain {} ({})",
            chain.adapter.kind,
            chain.id,
            chain.name
        );

        let adapter = Arc::new(SimulatedChainAdapter::new(
            chain.id.clone(),
            chain.adapter.clone(),
        ));
        self.created
            .lock()
            .insert(chain.id.clone(), Arc::clone(&adapter));
        debug!(chain = %chain.id, "Simulated adapter created");
        Ok(adapter)
    }
}
