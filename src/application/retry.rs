use crate::domain::context::{BackoffStrategy, RetryPolicy};
use rand::Rng;
use std::time::Duration;

/// Upper bound (exclusive) of the jitter added to every retry delay.
pub const MAX_JITTER: Duration = Duration::from_millis(1_000);

/// Source of the random term added to retry delays.
pub trait JitterSource: Send + Sync {
    /// A value in `[0, MAX_JITTER)`.
    fn jitter(&self) -> Duration;
}

/// Uniform jitter from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn jitter(&self) -> Duration {
        let micros = rand::thread_rng().gen_range(0..MAX_JITTER.as_micros() as u64);
        Duration::from_micros(micros)
    }
}

/// Always returns the same jitter, clamped below [`MAX_JITTER`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedJitter(pub Duration);

impl FixedJitter {
    pub const NONE: FixedJitter = FixedJitter(Duration::ZERO);
}

impl JitterSource for FixedJitter {
    fn jitter(&self) -> Duration {
        self.0.min(MAX_JITTER - Duration::from_micros(1))
    }
}

/// Delay before retrying after `attempt` failed, without jitter.
///
/// Attempts are 1-based; `0` is treated as `1`.
pub fn backoff_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let attempt = attempt.max(1);
    let base = policy.base_delay_ms;
    let millis = match policy.backoff_strategy {
        BackoffStrategy::Exponential => {
            let factor = 2u64.checked_pow(attempt - 1).unwrap_or(u64::MAX);
            base.saturating_mul(factor).min(policy.max_delay_ms)
        }
        BackoffStrategy::Linear => base.saturating_mul(attempt as u64).min(policy.max_delay_ms),
        BackoffStrategy::Fixed => base,
    };
    Duration::from_millis(millis)
}

/// Delay before retrying after `attempt` failed, including jitter.
pub fn next_delay(attempt: u32, policy: &RetryPolicy, jitter: &dyn JitterSource) -> Duration {
    backoff_delay(attempt, policy).saturating_add(jitter.jitter())
}
