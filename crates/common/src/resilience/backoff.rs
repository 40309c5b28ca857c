// Backoff delay calculation with optional jitter
use std::time::Duration;

use rand::Rng;

/// Maximum exponent for exponential backoff calculation to prevent overflow
pub const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Default base delay for exponential backoff (`base * 2^0` for the first retry)
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// How the delay grows with the retry number
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed(Duration),
    /// `initial_delay * 2^retry`, capped at `max_delay`
    Exponential { initial_delay: Duration, max_delay: Duration },
    /// Custom backoff function of the retry number
    Custom(fn(u32) -> Duration),
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential { initial_delay: DEFAULT_BASE_DELAY, max_delay: DEFAULT_MAX_DELAY }
    }
}

impl BackoffStrategy {
    /// Calculate the delay before retry number `retry` (0-based)
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::Exponential { initial_delay, max_delay } => {
                let multiplier = 1u32 << retry.min(MAX_BACKOFF_EXPONENT);
                initial_delay.saturating_mul(multiplier).min(*max_delay)
            }
            Self::Custom(f) => f(retry),
        }
    }
}

/// Jitter type for adding randomness to retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// No jitter
    #[default]
    None,
    /// Full jitter: 0 to calculated delay
    Full,
    /// Equal jitter: half the calculated delay plus up to the other half
    Equal,
}

impl Jitter {
    /// Apply jitter to the calculated delay
    pub fn apply(self, delay: Duration) -> Duration {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        match self {
            Self::None => delay,
            Self::Full => Duration::from_millis(random_up_to(millis)),
            Self::Equal => {
                let half = millis / 2;
                Duration::from_millis(half + random_up_to(millis - half))
            }
        }
    }
}

fn random_up_to(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=max)
}

/// Strategy plus jitter: the full delay policy for one retry subscriber
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Backoff {
    strategy: BackoffStrategy,
    jitter: Jitter,
}

impl Backoff {
    /// Create a backoff policy from a strategy and a jitter mode
    pub fn new(strategy: BackoffStrategy, jitter: Jitter) -> Self {
        Self { strategy, jitter }
    }

    /// Exponential backoff starting at `initial_delay`, capped at `max_delay`
    pub fn exponential(initial_delay: Duration, max_delay: Duration) -> Self {
        Self::new(BackoffStrategy::Exponential { initial_delay, max_delay }, Jitter::None)
    }

    /// Same delay for every retry
    pub fn fixed(delay: Duration) -> Self {
        Self::new(BackoffStrategy::Fixed(delay), Jitter::None)
    }

    /// Replace the jitter mode
    #[must_use]
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `retry` (0-based), jitter included
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.jitter.apply(self.strategy.calculate_delay(retry))
    }

    /// The underlying growth strategy
    pub fn strategy(&self) -> &BackoffStrategy {
        &self.strategy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_doubles_from_initial_delay() {
        let strategy = BackoffStrategy::default();
        assert_eq!(strategy.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(strategy.calculate_delay(1), Duration::from_secs(2));
        assert_eq!(strategy.calculate_delay(2), Duration::from_secs(4));
        assert_eq!(strategy.calculate_delay(5), Duration::from_secs(32));
    }

    #[test]
    fn exponential_is_capped_and_does_not_overflow() {
        let strategy = BackoffStrategy::Exponential {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(strategy.calculate_delay(10), Duration::from_secs(10));
        assert_eq!(strategy.calculate_delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn custom_strategy_is_called_with_retry_number() {
        let strategy = BackoffStrategy::Custom(|retry| Duration::from_millis(u64::from(retry) * 7));
        assert_eq!(strategy.calculate_delay(3), Duration::from_millis(21));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let delay = Duration::from_millis(1000);
        for _ in 0..100 {
            assert!(Jitter::Full.apply(delay) <= delay);
            let equal = Jitter::Equal.apply(delay);
            assert!(equal >= Duration::from_millis(500) && equal <= delay);
        }
        assert_eq!(Jitter::None.apply(delay), delay);
        assert_eq!(Jitter::Full.apply(Duration::ZERO), Duration::ZERO);
    }
}
