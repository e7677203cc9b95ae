// file: src/reconnect.rs
// description: capped exponential backoff for reconnection attempts

use std::time::Duration;

/// Shortest wait [`Backoff`] hands out, whatever the config says.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Random spread added on top of each delay, as a fraction of it (`0.0` disables).
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Attempt counter plus the delay the next retry should wait.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    current: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        let current = first_delay(&config);
        Self {
            config,
            current,
            attempt: 0,
        }
    }

    /// Number of retries handed out since the last [`reset`](Self::reset).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Delay for the upcoming retry; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let base = self.current;
        self.current = next_delay(self.current, &self.config).max(MIN_RETRY_DELAY);
        self.apply_jitter(base)
    }

    pub fn reset(&mut self) {
        self.current = first_delay(&self.config);
        self.attempt = 0;
    }

    fn apply_jitter(&self, base: Duration) -> Duration {
        if self.config.jitter <= 0.0 {
            return base;
        }
        let spread = base.as_millis() as f64 * self.config.jitter * fastrand::f64();
        (base + Duration::from_millis(spread as u64))
            .min(self.config.max_delay)
            .max(base)
    }
}

fn first_delay(config: &ReconnectConfig) -> Duration {
    config.initial_delay.min(config.max_delay).max(MIN_RETRY_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_delay_doubles() {
        let config = ReconnectConfig::default();
        let d = next_delay(Duration::from_secs(1), &config);
        assert_eq!(d, Duration::from_secs(2));
    }

    #[test]
    fn next_delay_clamps_at_max() {
        let config = ReconnectConfig {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        let d = next_delay(Duration::from_secs(8), &config);
        assert_eq!(d, Duration::from_secs(10));
    }

    #[test]
    fn full_backoff_sequence() {
        let mut backoff = Backoff::new(ReconnectConfig::default());
        let expected = [1, 2, 4, 8, 16, 30, 30, 30];

        for (i, &expected_secs) in expected.iter().enumerate() {
            assert_eq!(backoff.next_delay().as_secs(), expected_secs);
            assert_eq!(backoff.attempt(), i as u32 + 1);
        }
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut backoff = Backoff::new(ReconnectConfig::default());
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn zero_delays_are_floored() {
        let mut backoff = Backoff::new(ReconnectConfig {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Default::default()
        });
        for _ in 0..5 {
            assert_eq!(backoff.next_delay(), MIN_RETRY_DELAY);
        }
    }

    #[test]
    fn jitter_stays_within_cap() {
        let mut backoff = Backoff::new(ReconnectConfig {
            initial_delay: Duration::from_secs(20),
            max_delay: Duration::from_secs(30),
            jitter: 1.0,
            ..Default::default()
        });
        for _ in 0..50 {
            let d = backoff.next_delay();
            assert!(d >= Duration::from_secs(20) && d <= Duration::from_secs(30));
        }
    }
}
