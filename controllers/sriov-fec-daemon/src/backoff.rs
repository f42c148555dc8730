//! # Fibonacci Backoff
//!
//! Requeue delay after a failed reconciliation. Grows more slowly than
//! exponential backoff so a node stuck on a transient API error is retried
//! promptly, while a persistent hardware failure doesn't hammer the host.
//!
//! Sequence with the daemon defaults: 1m, 1m, 2m, 3m, 5m, 8m, 10m (max).

use std::time::Duration;

/// Stateful Fibonacci backoff, reset after every successful pass.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Step size; the first two delays equal it
    unit: Duration,
    /// Upper bound for any delay
    max: Duration,
    prev: u32,
    current: u32,
}

impl FibonacciBackoff {
    /// Backoff starting at `unit` and capped at `max`.
    #[must_use]
    pub fn new(unit: Duration, max: Duration) -> Self {
        Self {
            unit,
            max,
            prev: 0,
            current: 1,
        }
    }

    /// Daemon default: one-minute steps, capped at ten minutes.
    #[must_use]
    pub fn reconcile_default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(600))
    }

    /// Returns the current delay and advances the sequence.
    pub fn next_backoff(&mut self) -> Duration {
        let delay = self.unit.saturating_mul(self.current).min(self.max);

        // Stop growing once the cap is reached so the multiplier can't overflow
        if delay < self.max {
            let next = self.prev.saturating_add(self.current);
            self.prev = self.current;
            self.current = next;
        }

        delay
    }

    /// Restarts the sequence from the first delay.
    pub fn reset(&mut self) {
        self.prev = 0;
        self.current = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes(backoff: &mut FibonacciBackoff, n: usize) -> Vec<u64> {
        (0..n).map(|_| backoff.next_backoff().as_secs() / 60).collect()
    }

    #[test]
    fn test_reconcile_default_sequence() {
        let mut backoff = FibonacciBackoff::reconcile_default();
        assert_eq!(minutes(&mut backoff, 7), vec![1, 1, 2, 3, 5, 8, 10]);
    }

    #[test]
    fn test_stays_at_cap() {
        let mut backoff = FibonacciBackoff::reconcile_default();
        let _ = minutes(&mut backoff, 7);
        assert_eq!(minutes(&mut backoff, 50), vec![10; 50]);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut backoff = FibonacciBackoff::reconcile_default();
        assert_eq!(minutes(&mut backoff, 4), vec![1, 1, 2, 3]);
        backoff.reset();
        assert_eq!(minutes(&mut backoff, 3), vec![1, 1, 2]);
    }

    #[test]
    fn test_sub_minute_units() {
        let mut backoff = FibonacciBackoff::new(Duration::from_millis(100), Duration::from_millis(450));
        let delays: Vec<_> = (0..6).map(|_| backoff.next_backoff().as_millis()).collect();
        assert_eq!(delays, vec![100, 100, 200, 300, 450, 450]);
    }
}
