// src/engine/retry.rs

use std::time::Duration;

use rand::Rng;

/// Exponential backoff policy for failed attempts.
///
/// Pure value; the scheduler owns the actual sleeping. The delay before
/// attempt `n` (1-indexed, n >= 2) is `base_delay * multiplier^(n-2)`,
/// scaled by a uniform random factor in `[1-jitter, 1+jitter]` and capped
/// at `max_delay`. Attempt 1 runs immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    /// Jitter fraction in `[0, 1)`. Zero makes delays deterministic.
    pub jitter: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: 0.1,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Policy with no delays at all, for tests and impatient callers.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
            max_delay: Duration::ZERO,
        }
    }

    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let exponent = (attempt - 2) as i32;
        let mut secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);

        if self.jitter > 0.0 {
            let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
            secs *= factor;
        }

        Duration::from_secs_f64(secs.max(0.0)).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: f64) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter,
            max_delay: Duration::from_secs(60),
        }
    }

    #[test]
    fn first_attempt_has_no_delay() {
        assert_eq!(policy(0.0).delay_before_attempt(1), Duration::ZERO);
    }

    #[test]
    fn delays_grow_exponentially_without_jitter() {
        let p = policy(0.0);
        assert_eq!(p.delay_before_attempt(2), Duration::from_secs(1));
        assert_eq!(p.delay_before_attempt(3), Duration::from_secs(2));
        assert_eq!(p.delay_before_attempt(4), Duration::from_secs(4));
        assert_eq!(p.delay_before_attempt(5), Duration::from_secs(8));
    }

    #[test]
    fn delay_is_capped_at_max() {
        let p = policy(0.0);
        assert_eq!(p.delay_before_attempt(30), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let p = policy(0.25);
        for _ in 0..100 {
            let d = p.delay_before_attempt(2).as_secs_f64();
            assert!((0.75..=1.25).contains(&d), "delay {d} out of bounds");
        }
    }
}
