//! Simulated Chain Adapters
//!
//! In-process implementation of the `ChainAdapter` port used by the
//! binary's demo configuration and by tests.

pub mod adapter;
pub mod factory;

pub use adapter::SimulatedChainAdapter;
pub use factory::{SIMULATED_KIND, SimulatedAdapterFactory};
