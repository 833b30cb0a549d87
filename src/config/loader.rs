//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::{AppConfig, ChainConfig, RegistryConfig};

/// Load and validate configuration from a TOML file.
///
/// # Arguments
/// * `path` - Path to the config.toml file
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    chains = config.chains.len(),
    max_retries = config.registry.max_retries,
    breaker_threshold = config.registry.circuit_breaker_threshold,
    fallback = config.registry.use_fallback_chains,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig =
    toml::from_str(content).with_context(|| "Failed to parse config.toml")?;

  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Positive thresholds and delays where required
/// - Base delay not above max delay (registry-wide and per chain)
/// - Unique chain ids
/// - Fallback targets that exist and are not self references
fn validate_config(config: &AppConfig) -> Result<()> {
  anyhow::ensure!(!config.service.name.is_empty(), "service.name must not be empty");

  validate_registry(&config.registry)?;

  let mut seen = HashSet::new();
  for chain in &config.chains {
    anyhow::ensure!(
      seen.insert(chain.id.clone()),
      "Chain {} ({}) is configured more than once",
      chain.id,
      chain.name
    );
    validate_chain(chain, &config.registry)?;
  }

  for chain in &config.chains {
    if let Some(fallback) = &chain.fallback {
      anyhow::ensure!(
        fallback != &chain.id,
        "Chain {} ({}) cannot be its own fallback",
        chain.id,
        chain.name
      );
      anyhow::ensure!(
        seen.contains(fallback),
        "Chain {} ({}) falls back to unconfigured chain {}",
        chain.id,
        chain.name,
        fallback
      );
    }
  }

  Ok(())
}

fn validate_registry(registry: &RegistryConfig) -> Result<()> {
  anyhow::ensure!(
    registry.circuit_breaker_threshold >= 1,
    "circuit_breaker_threshold must be at least 1"
  );
  anyhow::ensure!(
    registry.half_open_success_threshold >= 1,
    "half_open_success_threshold must be at least 1"
  );
  anyhow::ensure!(
    registry.circuit_breaker_reset_timeout_ms > 0,
    "circuit_breaker_reset_timeout_ms must be positive"
  );
  anyhow::ensure!(
    registry.retry_base_delay_ms <= registry.retry_max_delay_ms,
    "retry_base_delay_ms ({}) must not exceed retry_max_delay_ms ({})",
    registry.retry_base_delay_ms,
    registry.retry_max_delay_ms
  );
  anyhow::ensure!(
    registry.health_check_interval_ms > 0,
    "health_check_interval_ms must be positive"
  );
  anyhow::ensure!(
    registry.operation_timeout_ms > 0,
    "operation_timeout_ms must be positive"
  );
  anyhow::ensure!(
    registry.bridge_fee_bps < 10_000,
    "bridge_fee_bps must be below 10000, got {}",
    registry.bridge_fee_bps
  );
  Ok(())
}

fn validate_chain(chain: &ChainConfig, registry: &RegistryConfig) -> Result<()> {
  anyhow::ensure!(
    !chain.id.as_str().is_empty(),
    "Chain {} has an empty id",
    chain.name
  );

  let base = chain.retry_base_delay_ms.unwrap_or(registry.retry_base_delay_ms);
  let max = chain.retry_max_delay_ms.unwrap_or(registry.retry_max_delay_ms);
  anyhow::ensure!(
    base <= max,
    "Chain {} ({}): retry base delay {}ms exceeds max delay {}ms",
    chain.id,
    chain.name,
    base,
    max
  );

  if let Some(threshold) = chain.circuit_breaker_threshold {
    anyhow::ensure!(
      threshold >= 1,
      "Chain {} ({}): circuit_breaker_threshold must be at least 1",
      chain.id,
      chain.name
    );
  }
  if let Some(threshold) = chain.half_open_success_threshold {
    anyhow::ensure!(
      threshold >= 1,
      "Chain {} ({}): half_open_success_threshold must be at least 1",
      chain.id,
      chain.name
    );
  }

  anyhow::ensure!(
    (0.0..=1.0).contains(&chain.adapter.failure_rate),
    "Chain {} ({}): adapter.failure_rate must be in [0, 1], got {}",
    chain.id,
    chain.name,
    chain.adapter.failure_rate
  );
  if let Some(rps) = chain.adapter.requests_per_second {
    anyhow::ensure!(
      rps > 0,
      "Chain {} ({}): adapter.requests_per_second must be positive",
      chain.id,
      chain.name
    );
  }

  Ok(())
}
