//! Reconnect backoff schedule (§4.5): exponential from 1s, factor 2, capped
//! at 30s, up to 10 attempts.

use std::time::Duration;

pub const INITIAL_DELAY: Duration = Duration::from_secs(1);
pub const MAX_DELAY: Duration = Duration::from_secs(30);
pub const MAX_ATTEMPTS: u32 = 10;

/// Delay before the `attempt`-th reconnect (1-indexed). Returns `None` once
/// `attempt` exceeds [`MAX_ATTEMPTS`].
pub fn delay_for_attempt(attempt: u32) -> Option<Duration> {
    if attempt == 0 || attempt > MAX_ATTEMPTS {
        return None;
    }
    let factor = 1u64 << (attempt - 1).min(16);
    let delay = INITIAL_DELAY.saturating_mul(factor as u32);
    Some(delay.min(MAX_DELAY))
}
