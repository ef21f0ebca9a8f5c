//! Retry decisions and backoff timing.

use std::time::Duration;

use rand::Rng;

use crate::classify::ErrorKind;

/// Backoff delays are capped at ten seconds regardless of attempt count.
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Kinds worth retrying: transient by nature, likely to clear on a fresh
/// attempt. Everything else is terminal regardless of budget.
pub const RETRYABLE_KINDS: [ErrorKind; 4] = [
    ErrorKind::ConnectionFailure,
    ErrorKind::Timeout,
    ErrorKind::Deadlock,
    ErrorKind::SerializationFailure,
];

// ============================================================================
// Jitter source
// ============================================================================

/// Source of the random jitter term added to each backoff delay.
///
/// Injected so tests can pin delays; production uses [`ThreadRngJitter`].
pub trait Jitter: Send + Sync {
    /// A duration uniformly sampled from `[0, upper]`.
    fn sample(&self, upper: Duration) -> Duration;
}

/// Default jitter backed by the thread-local RNG.
#[derive(Debug, Default)]
pub struct ThreadRngJitter;

impl Jitter for ThreadRngJitter {
    fn sample(&self, upper: Duration) -> Duration {
        let upper_ms = upper.as_millis() as u64;
        if upper_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=upper_ms))
    }
}

/// Zero jitter, for deterministic tests.
#[derive(Debug, Default)]
pub struct NoJitter;

impl Jitter for NoJitter {
    fn sample(&self, _upper: Duration) -> Duration {
        Duration::ZERO
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Decides whether a failed attempt is retried and how long to wait first.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retry budget. Zero means a single attempt, no retries.
    pub max_retries: u32,
    /// Base delay for the exponential backoff curve.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self { max_retries, base_delay }
    }

    /// True iff `kind` is transient and the budget is not exhausted.
    /// `attempt` is 1-based: after attempt `max_retries` the budget is spent.
    pub fn should_retry(&self, kind: ErrorKind, attempt: u32) -> bool {
        RETRYABLE_KINDS.contains(&kind) && attempt < self.max_retries
    }

    /// Exponential backoff with jitter:
    /// `min(2^(attempt-1) * base + jitter(0..base), 10s)`.
    pub fn delay_for(&self, attempt: u32, jitter: &dyn Jitter) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let shift = attempt.saturating_sub(1).min(63);
        let exponential_ms = base_ms.saturating_mul(1u64 << shift);
        let jitter_ms = jitter.sample(self.base_delay).as_millis() as u64;
        let total = exponential_ms.saturating_add(jitter_ms);
        Duration::from_millis(total).min(MAX_BACKOFF)
    }
}
