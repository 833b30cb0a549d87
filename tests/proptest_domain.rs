//! Property-Based Tests — Reliability Invariants
//!
//! Uses `proptest` to verify that backoff, classification, breaker and
//! retry behaviour hold across random inputs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use proptest::prelude::*;

use chain_adapter_registry::domain::backoff::{BackoffPolicy, JITTER_FRACTION};
use chain_adapter_registry::domain::chain::ChainId;
use chain_adapter_registry::domain::classifier::{self, ErrorClass};
use chain_adapter_registry::domain::error::{RegistryError, RpcError};
use chain_adapter_registry::usecases::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState,
};
use chain_adapter_registry::usecases::retry_executor::{RetryExecutor, RetryPolicy};
use chain_adapter_registry::usecases::telemetry::MetricsHandle;

fn policy(base_ms: u64, max_ms: u64, exponential: bool) -> BackoffPolicy {
    BackoffPolicy {
        base_delay: Duration::from_millis(base_ms),
        max_delay: Duration::from_millis(max_ms),
        exponential,
        jitter: false,
    }
}

// ── Backoff Properties ──────────────────────────────────────

proptest! {
    /// Nominal delays never shrink as the retry number grows.
    #[test]
    fn backoff_is_non_decreasing(
        base in 1u64..5_000,
        max in 1u64..120_000,
        exponential in any::<bool>(),
        retry in 1u32..80,
    ) {
        let p = policy(base, max, exponential);
        let current = p.nominal_delay(retry);
        let next = p.nominal_delay(retry + 1);
        prop_assert!(
            next >= current,
            "delay shrank: retry {retry} = {current:?}, retry {} = {next:?}",
            retry + 1
        );
    }

    /// No delay ever exceeds the configured maximum.
    #[test]
    fn backoff_never_exceeds_max(
        base in 1u64..5_000,
        max in 1u64..120_000,
        exponential in any::<bool>(),
        retry in 0u32..u32::MAX,
        offset in -1.0f64..1.0,
    ) {
        let p = policy(base, max, exponential);
        let cap = Duration::from_millis(max);
        prop_assert!(p.nominal_delay(retry) <= cap);
        prop_assert!(p.delay_with_offset(retry, offset) <= cap);
    }

    /// Jittered delays stay within ±30% of the nominal delay.
    #[test]
    fn jitter_stays_in_band(
        base in 10u64..5_000,
        retry in 1u32..6,
        offset in -JITTER_FRACTION..=JITTER_FRACTION,
    ) {
        let p = policy(base, 1_000_000, true);
        let nominal = p.nominal_delay(retry).as_secs_f64();
        let jittered = p.delay_with_offset(retry, offset).as_secs_f64();
        let low = nominal * (1.0 - JITTER_FRACTION) - 1e-6;
        let high = nominal * (1.0 + JITTER_FRACTION) + 1e-6;
        prop_assert!(
            jittered >= low && jittered <= high,
            "jittered {jittered} outside [{low}, {high}]"
        );
    }
}

// ── Classifier Properties ───────────────────────────────────

proptest! {
    /// Classifying the same message twice gives the same answer.
    #[test]
    fn classification_is_deterministic(message in ".{0,64}") {
        prop_assert_eq!(
            classifier::classify_message(&message),
            classifier::classify_message(&message)
        );
    }

    /// Transient status codes are retriable whatever the message says.
    #[test]
    fn transient_codes_are_retriable(
        code in prop::sample::select(vec![429i64, 500, 502, 503, 504, -32603, -32005]),
        message in "[a-z ]{0,32}",
    ) {
        let err = anyhow::Error::new(RpcError::new(code, message));
        prop_assert!(classifier::is_retriable(&err));
    }

    /// A circuit-open message is terminal even next to network vocabulary.
    #[test]
    fn circuit_open_is_never_retriable(
        prefix in "[a-z ]{0,16}",
        suffix in prop::sample::select(vec!["", " after timeout", " connection refused", " nonce too low"]),
    ) {
        let message = format!("{prefix}circuit breaker open{suffix}");
        prop_assert_eq!(classifier::classify_message(&message), ErrorClass::CircuitOpen);
        prop_assert!(!classifier::is_retriable(&anyhow::anyhow!(message)));
    }

    /// Purely numeric messages carry no transient vocabulary.
    #[test]
    fn digit_only_messages_are_terminal(message in "[0-9]{1,24}") {
        prop_assert_eq!(classifier::classify_message(&message), ErrorClass::Terminal);
    }
}

// ── Circuit Breaker Properties ──────────────────────────────

proptest! {
    /// The breaker tracks a simple model: consecutive failures open it at
    /// the threshold, a success while closed clears the count, and an open
    /// breaker ignores further outcomes until the reset timeout.
    #[test]
    fn breaker_matches_consecutive_failure_model(
        threshold in 1u32..6,
        outcomes in prop::collection::vec(any::<bool>(), 0..40),
    ) {
        let breaker = CircuitBreaker::new(
            ChainId::from("model"),
            CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout: Duration::from_secs(3_600),
                half_open_success_threshold: 1,
            },
            MetricsHandle::disabled(),
        );

        let mut failures = 0u32;
        let mut open = false;
        for ok in outcomes {
            if open {
                prop_assert!(breaker.check().is_err());
                continue;
            }
            if ok {
                breaker.record_success();
                failures = 0;
            } else {
                breaker.record_failure("boom");
                failures += 1;
                open = failures >= threshold;
            }
            let expected = if open { CircuitState::Open } else { CircuitState::Closed };
            prop_assert_eq!(breaker.state(), expected);
            if !open {
                prop_assert_eq!(breaker.snapshot().failure_count, failures);
            }
        }
    }
}

// ── Retry Executor Properties ───────────────────────────────

proptest! {
    /// `k` transient failures followed by a success take `k + 1` attempts
    /// when the budget allows, and exhaust after `max_retries + 1` when not.
    #[test]
    fn retry_attempts_follow_budget(max_retries in 0u32..5, failures in 0u32..8) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        let executor = RetryExecutor::new(
            ChainId::from("retry"),
            RetryPolicy {
                max_retries,
                backoff: policy(10, 100, true),
            },
            MetricsHandle::disabled(),
        );
        let calls = Arc::new(AtomicU32::new(0));

        let result = runtime.block_on(executor.execute("getBalance", || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < failures {
                    anyhow::bail!("network timeout");
                }
                Ok(n)
            }
        }));

        if failures <= max_retries {
            let outcome = result.unwrap();
            prop_assert_eq!(outcome.attempts, failures + 1);
            prop_assert_eq!(executor.lifetime_retries(), u64::from(failures));
        } else {
            let is_exhausted = matches!(
                result,
                Err(RegistryError::RetriesExhausted { attempts, .. }) if attempts == max_retries + 1
            );
            prop_assert!(is_exhausted);
            prop_assert_eq!(calls.load(Ordering::SeqCst), max_retries + 1);
        }
    }
}
