//! Retry Executor - Classified Retries with Backoff
//!
//! Wraps one logical operation in bounded, strictly sequential retries.
//! Each failure is classified: terminal errors (including an open
//! circuit) propagate on the first attempt, transient ones are retried
//! after a backoff delay until `max_retries` is spent. The executor is
//! stateless apart from a lifetime retry counter used for metrics.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{ChainConfig, RegistryConfig};
use crate::domain::backoff::BackoffPolicy;
use crate::domain::chain::ChainId;
use crate::domain::classifier::{self, ErrorClass};
use crate::domain::error::RegistryError;

use super::telemetry::MetricsHandle;

/// Per-chain retry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
  /// Retries allowed after the first attempt.
  pub max_retries: u32,
  pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 3,
      backoff: BackoffPolicy::default(),
    }
  }
}

impl RetryPolicy {
  /// Registry defaults with the chain's overrides applied.
  pub fn for_chain(registry: &RegistryConfig, chain: &ChainConfig) -> Self {
    Self {
      max_retries: chain.max_retries.unwrap_or(registry.max_retries),
      backoff: BackoffPolicy {
        base_delay: Duration::from_millis(
          chain.retry_base_delay_ms.unwrap_or(registry.retry_base_delay_ms),
        ),
        max_delay: Duration::from_millis(
          chain.retry_max_delay_ms.unwrap_or(registry.retry_max_delay_ms),
        ),
        exponential: registry.retry_exponential,
        jitter: registry.retry_jitter,
      },
    }
  }
}

/// Successful result together with the number of attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome<T> {
  pub value: T,
  pub attempts: u32,
}

/// Retry handler bound to one chain.
#[derive(Debug)]
pub struct RetryExecutor {
  chain_id: ChainId,
  policy: RetryPolicy,
  lifetime_retries: AtomicU64,
  metrics: MetricsHandle,
}

impl RetryExecutor {
  pub fn new(chain_id: ChainId, policy: RetryPolicy, metrics: MetricsHandle) -> Self {
    Self {
      chain_id,
      policy,
      lifetime_retries: AtomicU64::new(0),
      metrics,
    }
  }

  pub fn policy(&self) -> &RetryPolicy {
    &self.policy
  }

  /// Retries performed by this executor since creation.
  pub fn lifetime_retries(&self) -> u64 {
    self.lifetime_retries.load(Ordering::Relaxed)
  }

  /// Run `op` until it succeeds, fails terminally or the retry budget is
  /// spent.
  ///
  /// # Errors
  /// - `NonRetriable` on the first failure the classifier deems terminal
  /// - `RetriesExhausted` after `max_retries + 1` transient failures
  pub async fn execute<T, F, Fut>(
    &self,
    operation: &str,
    op: F,
  ) -> Result<RetryOutcome<T>, RegistryError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
  {
    self.run(operation, op, |_| true).await
  }

  /// Like [`execute`](Self::execute), but a result rejected by
  /// `is_valid` counts as a transient failure.
  ///
  /// # Errors
  /// As `execute`, plus `ValidationFailed` when the final attempt still
  /// returned an invalid result.
  pub async fn execute_with_result_validation<T, F, Fut, V>(
    &self,
    operation: &str,
    op: F,
    is_valid: V,
  ) -> Result<RetryOutcome<T>, RegistryError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
    V: Fn(&T) -> bool,
  {
    self.run(operation, op, is_valid).await
  }

  async fn run<T, F, Fut, V>(
    &self,
    operation: &str,
    mut op: F,
    is_valid: V,
  ) -> Result<RetryOutcome<T>, RegistryError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
    V: Fn(&T) -> bool,
  {
    let mut attempt: u32 = 0;

    loop {
      attempt += 1;

      let failure = match op().await {
        Ok(value) if is_valid(&value) => {
          if attempt > 1 {
            debug!(
              chain = %self.chain_id,
              operation,
              attempts = attempt,
              "Operation succeeded after retry"
            );
          }
          return Ok(RetryOutcome {
            value,
            attempts: attempt,
          });
        }
        Ok(_) => Failure::Invalid,
        Err(e) => Failure::Error(e),
      };

      if let Failure::Error(e) = &failure {
        let class = classifier::classify(e);
        if !class.is_retriable() {
          debug!(
            chain = %self.chain_id,
            operation,
            class = class.as_str(),
            error = %e,
            "Terminal failure, not retrying"
          );
          return Err(self.terminal(operation, attempt, class, failure));
        }
      }

      if attempt > self.policy.max_retries {
        warn!(
          chain = %self.chain_id,
          operation,
          attempts = attempt,
          "Retry budget exhausted"
        );
        return Err(self.exhausted(operation, attempt, failure));
      }

      let delay = self.policy.backoff.delay(attempt);
      self.lifetime_retries.fetch_add(1, Ordering::Relaxed);
      self.metrics.record_retry_attempt(&self.chain_id, operation);
      match &failure {
        Failure::Error(e) => warn!(
          chain = %self.chain_id,
          operation,
          attempt,
          delay_ms = delay.as_millis() as u64,
          error = %e,
          "Transient failure, retrying"
        ),
        Failure::Invalid => warn!(
          chain = %self.chain_id,
          operation,
          attempt,
          delay_ms = delay.as_millis() as u64,
          "Result failed validation, retrying"
        ),
      }
      tokio::time::sleep(delay).await;
    }
  }

  fn terminal(
    &self,
    operation: &str,
    attempt: u32,
    class: ErrorClass,
    failure: Failure,
  ) -> RegistryError {
    let Failure::Error(source) = failure else {
      return self.exhausted(operation, attempt, failure);
    };
    if class == ErrorClass::CircuitOpen {
      // Hand a breaker rejection back in its own shape.
      return match source.downcast::<RegistryError>() {
        Ok(open) => open,
        Err(source) => RegistryError::NonRetriable {
          chain_id: self.chain_id.clone(),
          operation: operation.to_string(),
          source,
        },
      };
    }
    RegistryError::NonRetriable {
      chain_id: self.chain_id.clone(),
      operation: operation.to_string(),
      source,
    }
  }

  fn exhausted(&self, operation: &str, attempts: u32, failure: Failure) -> RegistryError {
    match failure {
      Failure::Error(source) => RegistryError::RetriesExhausted {
        chain_id: self.chain_id.clone(),
        operation: operation.to_string(),
        attempts,
        source,
      },
      Failure::Invalid => RegistryError::ValidationFailed {
        chain_id: self.chain_id.clone(),
        operation: operation.to_string(),
        attempts,
      },
    }
  }
}

enum Failure {
  Error(anyhow::Error),
  Invalid,
}
