//! Backoff Policy - Retry Delay Computation
//!
//! Pure delay math for the retry executor:
//! - exponential: `base * 2^(retry - 1)`
//! - linear:      `base * retry`
//! - optional symmetric jitter of ±30%
//! - always clamped to `max_delay`
//!
//! `retry` is 1-based: the delay before the first retry is `delay(1)`.

use std::time::Duration;

use rand::Rng;
use serde::Serialize;

/// Jitter spread applied symmetrically around the computed delay.
pub const JITTER_FRACTION: f64 = 0.3;

/// Retry delay configuration for one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Double the delay per retry instead of growing linearly.
    pub exponential: bool,
    /// Apply ±30% random jitter.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            exponential: true,
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `retry` without jitter.
    pub fn nominal_delay(&self, retry: u32) -> Duration {
        let retry = retry.max(1);
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let factor = if self.exponential {
            1_u64.checked_shl(retry - 1).unwrap_or(u64::MAX)
        } else {
            u64::from(retry)
        };
        let delay = Duration::from_millis(base_ms.saturating_mul(factor));
        delay.min(self.max_delay)
    }

    /// Delay before retry number `retry`, jittered if enabled.
    pub fn delay(&self, retry: u32) -> Duration {
        if self.jitter {
            let offset = rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
            self.delay_with_offset(retry, offset)
        } else {
            self.nominal_delay(retry)
        }
    }

    /// Delay for a given jitter offset in `[-0.3, 0.3]`.
    ///
    /// Split out from [`delay`](Self::delay) so the bounds can be tested
    /// without randomness.
    pub fn delay_with_offset(&self, retry: u32, offset: f64) -> Duration {
        let nominal = self.nominal_delay(retry).as_secs_f64();
        let offset = offset.clamp(-JITTER_FRACTION, JITTER_FRACTION);
        let jittered = Duration::from_secs_f64((nominal * (1.0 + offset)).max(0.0));
        jittered.min(self.max_delay)
    }
}
