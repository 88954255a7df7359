//! Exponential backoff.
//!
//! `attempt` counts retries, starting at 0 for the first retry after the
//! initial try. Jitter is uniform on `[1 - j, 1 + j]` and the result is
//! clamped to `[0, max_delay]` after jitter.

use std::time::Duration;

use capture_core::RetryPolicy;
use rand::Rng;

/// Delay before jitter: `min(base * multiplier^attempt, max)`.
pub fn base_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    Duration::from_millis(base_delay_ms(policy, attempt) as u64)
}

fn base_delay_ms(policy: &RetryPolicy, attempt: u32) -> f64 {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let raw = policy.base_delay_ms as f64 * policy.multiplier.powi(exponent);
    let cap = policy.max_delay_ms as f64;
    if raw.is_finite() { raw.min(cap) } else { cap }
}

/// Jittered delay for retry number `attempt`, drawing from `rng`.
pub fn delay<R: Rng + ?Sized>(policy: &RetryPolicy, attempt: u32, rng: &mut R) -> Duration {
    let base = base_delay_ms(policy, attempt);
    let jitter = policy.jitter_fraction.clamp(0.0, 1.0);
    let factor = if jitter > 0.0 {
        1.0 - jitter + 2.0 * jitter * rng.r#gen::<f64>()
    } else {
        1.0
    };
    let jittered = (base * factor).max(0.0).min(policy.max_delay_ms as f64);
    Duration::from_millis(jittered.round() as u64)
}
