//! # Backoff
//!
//! Two backoff schedules:
//!
//! - [`ExponentialBackoff`]: doubling delay with random jitter, used between retries of
//!   transient store failures, while waiting for a busy lock and by the audit flusher.
//! - [`FibonacciBackoff`]: slower-growing schedule used by the watch loop when a whole
//!   reconciliation run fails (source unreadable, store listing unavailable).
//!
//! ## Usage
//!
//! ```rust
//! use secret_reconciler::controller::backoff::FibonacciBackoff;
//!
//! let mut backoff = FibonacciBackoff::new(10, 300); // 10 seconds min, 5 minutes max
//! assert_eq!(backoff.next_backoff_seconds(), 10);
//! assert_eq!(backoff.next_backoff_seconds(), 10);
//! assert_eq!(backoff.next_backoff_seconds(), 20);
//! assert_eq!(backoff.next_backoff_seconds(), 30);
//! ```

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter
///
/// Each call to [`ExponentialBackoff::next_delay`] returns the current base delay plus a
/// random jitter of up to half of it, then doubles the base (capped at `max`).
/// The jitter spreads out retries from concurrent workers hitting the same backend.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    current: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            current: initial,
            max,
        }
    }

    /// Get the next delay (with jitter) and advance the schedule
    pub fn next_delay(&mut self) -> Duration {
        let base_ms = u64::try_from(self.current.as_millis()).unwrap_or(u64::MAX);
        // Create rng here to avoid holding non-Send type across await
        let jitter_ms = rand::rng().random_range(0..=base_ms / 2);
        self.current = (self.current * 2).min(self.max);
        Duration::from_millis(base_ms.saturating_add(jitter_ms))
    }

    /// Base delay of the next call, without jitter
    #[must_use]
    pub fn current_base(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Fibonacci backoff calculator
///
/// Generates backoff durations following the Fibonacci sequence, in seconds.
/// Each backoff is the sum of the previous two backoffs, capped at the maximum.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Minimum backoff value in seconds (for reset)
    min_seconds: u64,
    /// Previous backoff value in seconds
    prev_seconds: u64,
    /// Current backoff value in seconds
    current_seconds: u64,
    /// Maximum backoff value in seconds
    max_seconds: u64,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with specified minimum and maximum values in seconds
    ///
    /// # Arguments
    ///
    /// * `min_seconds` - Minimum backoff duration (used for the first two values)
    /// * `max_seconds` - Maximum backoff duration (caps the sequence)
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            prev_seconds: 0,
            current_seconds: min_seconds,
            max_seconds,
        }
    }

    /// Get the next backoff duration in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_seconds;
        let next = self.prev_seconds + self.current_seconds;
        self.prev_seconds = self.current_seconds;
        self.current_seconds = std::cmp::min(next, self.max_seconds);
        result
    }

    /// Get the next backoff duration as a `Duration` and advance the sequence
    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Reset the backoff to the initial state (after a successful run)
    pub fn reset(&mut self) {
        self.prev_seconds = 0;
        self.current_seconds = self.min_seconds;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(10, 100);

        assert_eq!(backoff.next_backoff_seconds(), 10);
        assert_eq!(backoff.next_backoff_seconds(), 10);
        assert_eq!(backoff.next_backoff_seconds(), 20);
        assert_eq!(backoff.next_backoff_seconds(), 30);
        assert_eq!(backoff.next_backoff_seconds(), 50);
        assert_eq!(backoff.next_backoff_seconds(), 80);
        assert_eq!(backoff.next_backoff_seconds(), 100); // capped
        assert_eq!(backoff.next_backoff_seconds(), 100);
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::new(10, 100);
        backoff.next_backoff_seconds();
        backoff.next_backoff_seconds();
        backoff.next_backoff_seconds();

        backoff.reset();

        assert_eq!(backoff.next_backoff(), Duration::from_secs(10));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(10));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(20));
    }

    #[test]
    fn test_exponential_backoff_doubles_within_jitter_bounds() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(1_000));

        for expected_base in [100_u64, 200, 400, 800, 1_000, 1_000] {
            let delay = backoff.next_delay().as_millis();
            let base = u128::from(expected_base);
            assert!(
                delay >= base && delay <= base + base / 2,
                "delay {delay}ms outside [{base}, {}]",
                base + base / 2
            );
        }
    }

    #[test]
    fn test_exponential_backoff_reset() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(50), Duration::from_secs(1));
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.current_base(), Duration::from_millis(200));

        backoff.reset();
        assert_eq!(backoff.current_base(), Duration::from_millis(50));
    }

    #[test]
    fn test_exponential_backoff_initial_clamped_to_max() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(backoff.current_base(), Duration::from_secs(1));
    }
}
