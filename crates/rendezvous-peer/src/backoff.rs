//! Exponential backoff for relay reconnection

use std::time::Duration;

use rendezvous_core::ReconnectConfig;

/// Reconnect schedule: `initial * 2^(k-1)` capped at `max_delay`, for at most
/// `max_attempts` attempts
#[derive(Clone, Debug)]
pub struct Backoff {
    initial_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl Backoff {
    pub fn new(initial_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the attempt cap is reached
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }

        self.attempts += 1;
        let factor = 2u32.saturating_pow(self.attempts - 1);
        Some(
            self.initial_delay
                .checked_mul(factor)
                .map_or(self.max_delay, |delay| delay.min(self.max_delay)),
        )
    }

    /// Attempts made since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Called after a successful connection
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

impl From<&ReconnectConfig> for Backoff {
    fn from(config: &ReconnectConfig) -> Self {
        Self::new(config.initial_delay(), config.max_delay(), config.max_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_until_capped() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000), 6);

        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            [100, 200, 400, 800, 1000, 1000]
                .into_iter()
                .map(Duration::from_millis)
                .collect::<Vec<_>>()
        );
        assert!(backoff.is_exhausted());
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_reset_restarts_schedule() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 3);
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_large_attempt_counts_do_not_overflow() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60), 100);
        let last = std::iter::from_fn(|| backoff.next_delay()).last();
        assert_eq!(last, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_zero_attempts_never_retries() {
        let mut backoff = Backoff::from(&ReconnectConfig {
            max_attempts: 0,
            ..ReconnectConfig::default()
        });
        assert_eq!(backoff.next_delay(), None);
    }
}
