//! # Exponential Backoff
//!
//! Per-key retry delays for failed reconciliations.
//!
//! The nominal delay doubles on every failure, starting at `start` and capped at `max`.
//! The delay actually returned is drawn uniformly from `[nominal / 2, nominal]` so that
//! keys failing together (for example during an API outage) do not retry in lockstep.
//!
//! ## Usage
//!
//! ```rust
//! use secret_share_controller::controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30));
//! let first = backoff.next_backoff();
//! assert!(first >= Duration::from_millis(500) && first <= Duration::from_secs(1));
//! ```

use rand::Rng;
use std::time::Duration;

/// Exponential backoff calculator with jitter
///
/// Each failing key in the work queue owns one of these; the queue drops it once the key settles.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    max: Duration,
    /// Nominal delay returned by the next call
    current: Duration,
    /// Consecutive failures recorded so far
    attempts: u32,
}

impl ExponentialBackoff {
    /// Create a backoff starting at `start` and never exceeding `max`
    ///
    /// A zero `start` is raised to one millisecond so the sequence can grow.
    #[must_use]
    pub fn new(start: Duration, max: Duration) -> Self {
        let start = start.max(Duration::from_millis(1));
        let max = max.max(start);
        Self {
            max,
            current: start,
            attempts: 0,
        }
    }

    /// Nominal (un-jittered) delay of the next call, in milliseconds
    #[must_use]
    pub fn peek_nominal_ms(&self) -> u64 {
        u64::try_from(self.current.as_millis()).unwrap_or(u64::MAX)
    }

    /// Consecutive failures recorded since creation
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Get the next backoff delay and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let nominal = self.peek_nominal_ms();
        let delay = rand::thread_rng().gen_range(nominal / 2..=nominal);

        self.attempts = self.attempts.saturating_add(1);
        self.current = self.current.saturating_mul(2).min(self.max);

        Duration::from_millis(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(start_ms: u64, max_ms: u64) -> ExponentialBackoff {
        ExponentialBackoff::new(Duration::from_millis(start_ms), Duration::from_millis(max_ms))
    }

    #[test]
    fn test_exponential_backoff_sequence() {
        let mut backoff = backoff(1000, 30_000);

        // Nominal sequence: 1s, 2s, 4s, 8s, 16s, 30s (max)
        for expected in [1000, 2000, 4000, 8000, 16_000, 30_000] {
            assert_eq!(backoff.peek_nominal_ms(), expected);
            let delay = backoff.next_backoff();
            assert!(delay >= Duration::from_millis(expected / 2), "{delay:?} below half of {expected}ms");
            assert!(delay <= Duration::from_millis(expected), "{delay:?} above {expected}ms");
        }
    }

    #[test]
    fn test_exponential_backoff_max_cap() {
        let mut backoff = backoff(1000, 5000);
        for _ in 0..20 {
            assert!(backoff.next_backoff() <= Duration::from_millis(5000));
        }
        assert_eq!(backoff.peek_nominal_ms(), 5000);
        assert_eq!(backoff.attempts(), 20);
    }

    #[test]
    fn test_exponential_backoff_per_key_state() {
        let mut first = backoff(100, 10_000);
        let mut second = backoff(100, 10_000);

        first.next_backoff();
        first.next_backoff();
        first.next_backoff();

        assert_eq!(first.peek_nominal_ms(), 800);
        assert_eq!(second.peek_nominal_ms(), 100);
        second.next_backoff();
        assert_eq!(second.peek_nominal_ms(), 200);
    }

    #[test]
    fn test_zero_start_still_grows() {
        let mut backoff = backoff(0, 10);
        backoff.next_backoff();
        assert_eq!(backoff.peek_nominal_ms(), 2);
    }
}
