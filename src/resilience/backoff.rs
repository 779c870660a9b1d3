//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
/// capped at `max`, plus up to 10% jitter. Attempt 0 waits nothing.
pub fn exponential_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(31));
    let capped = base.saturating_mul(factor).min(max);

    // Spread reconnecting clients apart.
    let spread_ms = (capped.as_millis() / 10) as u64;
    if spread_ms == 0 {
        return capped;
    }
    capped + Duration::from_millis(rand::thread_rng().gen_range(0..spread_ms))
}
