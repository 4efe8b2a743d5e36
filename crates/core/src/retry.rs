//! Retry policy and backoff delay math.
//!
//! The executor that actually sleeps lives in the `holdfast` crate; this
//! module only computes how long to wait.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Largest power of two applied to the base delay.
const MAX_BACKOFF_EXPONENT: u32 = 20;

/// Bounded retry with exponential backoff and jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 1000,
            jitter_ms: 50,
        }
    }
}

impl RetryPolicy {
    /// Builds a normalized policy.
    pub fn new(
        enabled: bool,
        max_attempts: u32,
        base_delay_ms: u64,
        max_delay_ms: u64,
        jitter_ms: u64,
    ) -> Self {
        Self {
            enabled,
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            jitter_ms,
        }
        .normalized()
    }

    /// A policy that performs exactly one attempt.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Clamps fields so `max_attempts >= 1` and `max_delay_ms >= base_delay_ms`.
    pub fn normalized(self) -> Self {
        Self {
            max_attempts: self.max_attempts.max(1),
            max_delay_ms: self.max_delay_ms.max(self.base_delay_ms),
            ..self
        }
    }

    /// Whether another attempt may follow the given (1-based) failed attempt.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        self.enabled && attempt < self.max_attempts.max(1)
    }

    /// Backoff after failed `attempt`, before jitter.
    ///
    /// Attempt 1 waits the base delay; attempt `n > 1` waits
    /// `base * 2^(n-1)` capped at the max delay.
    pub fn backoff_ceiling(&self, attempt: u32) -> u64 {
        let policy = self.normalized();
        if attempt <= 1 {
            return policy.base_delay_ms;
        }
        let exponent = (attempt - 1).min(MAX_BACKOFF_EXPONENT);
        policy
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(policy.max_delay_ms)
    }

    /// Delay to sleep after failed `attempt`, jitter included.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let policy = self.normalized();
        let jitter = if policy.jitter_ms > 0 {
            rand::rng().random_range(0..=policy.jitter_ms)
        } else {
            0
        };
        let delay = self
            .backoff_ceiling(attempt)
            .saturating_add(jitter)
            .min(policy.max_delay_ms);
        Duration::from_millis(delay)
    }
}
