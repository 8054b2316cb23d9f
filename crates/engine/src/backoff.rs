//! Backoff policy — delay before the next delivery round.
//!
//! `delay = min(initial * multiplier^(attempt-1), max)` with ±20% jitter so that
//! many requests failing against the same endpoint do not retry in lockstep.
//! Exponent growth stops as soon as the cap is reached, so large attempt numbers
//! cannot overflow.

use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use courier_common::types::RetryPolicy;

/// Maximum jitter as a fraction of the base delay.
pub const JITTER_FRACTION: f64 = 0.2;

/// Delay before jitter for the round following `attempt` (1-based; 0 counts as 1).
pub fn base_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let attempt = attempt.max(1);
    let max = policy.max_backoff_seconds;
    let multiplier = u64::from(policy.backoff_multiplier.max(1));

    let mut delay = policy.initial_backoff_seconds.min(max);
    for _ in 1..attempt {
        if delay >= max || multiplier == 1 {
            break;
        }
        delay = delay.saturating_mul(multiplier).min(max);
    }

    Duration::from_secs(delay)
}

/// Jittered delay drawn from `rng`. Never shorter than one second.
pub fn jittered_delay<R: Rng + ?Sized>(attempt: u32, policy: &RetryPolicy, rng: &mut R) -> Duration {
    let base = base_delay(attempt, policy).as_secs_f64();
    let factor = 1.0 + rng.gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
    Duration::from_secs_f64((base * factor).max(1.0))
}

/// Stateful wrapper owning the jitter RNG.
pub struct BackoffPolicy {
    rng: Mutex<StdRng>,
    jitter: bool,
}

impl BackoffPolicy {
    /// Jittered policy seeded from OS entropy.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
            jitter: true,
        }
    }

    /// Jittered policy with a fixed seed; the delay sequence is reproducible.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            jitter: true,
        }
    }

    /// Policy that returns the exact base delays.
    pub fn without_jitter() -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(0)),
            jitter: false,
        }
    }

    pub fn next_delay(&self, attempt: u32, policy: &RetryPolicy) -> Duration {
        if !self.jitter {
            return base_delay(attempt, policy);
        }
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        jittered_delay(attempt, policy, &mut *rng)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new()
    }
}
