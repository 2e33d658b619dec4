//! Exponential backoff with jitter for Poster stage P3 retries.
//!
//! # Example
//!
//! ```
//! use postie::retry::backoff_delay;
//! use std::time::Duration;
//!
//! let delay = backoff_delay(Duration::from_secs(5), 1);
//! assert!(delay <= Duration::from_secs(60));
//! ```

use rand::Rng;
use std::time::Duration;

const MAX_DELAY: Duration = Duration::from_secs(60);
const JITTER_FRACTION: f64 = 0.2;

/// Compute the delay before retry attempt `attempt` (1-based: the delay
/// before the *second* overall try), following `base * 2^(attempt-1)`,
/// capped at 60s and jittered +/-20%.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = 2f64.powi(attempt.saturating_sub(1) as i32);
    let raw = (base.as_secs_f64() * exp).min(MAX_DELAY.as_secs_f64());

    let jitter_span = raw * JITTER_FRACTION;
    let jitter = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
    let jittered = (raw + jitter).max(0.0);

    Duration::from_secs_f64(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_exponentially_before_capping() {
        let base = Duration::from_secs(5);
        let d1 = backoff_delay(base, 1).as_secs_f64();
        let d2 = backoff_delay(base, 2).as_secs_f64();
        // jitter is +/-20%, so compare loose bounds rather than exact values
        assert!(d1 < 7.0);
        assert!(d2 > 7.0 && d2 < 13.0);
    }

    #[test]
    fn never_exceeds_cap_plus_jitter() {
        let base = Duration::from_secs(5);
        for attempt in 1..20 {
            let d = backoff_delay(base, attempt);
            assert!(d <= MAX_DELAY + MAX_DELAY.mul_f64(JITTER_FRACTION));
        }
    }
}
