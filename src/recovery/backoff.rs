//! Retry delay calculation.

use crate::recovery::classify::ErrorCode;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Exponential,
    Linear,
    Fibonacci,
    /// Caller-supplied function of the attempt number
    Custom,
}

/// Delay function for [`BackoffStrategy::Custom`]; receives the 1-based attempt.
pub type CustomDelay = Arc<dyn Fn(u32) -> u64 + Send + Sync>;

#[derive(Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default)]
    pub jitter_ms: u64,
    pub strategy: BackoffStrategy,
    #[serde(skip)]
    pub custom_delay: Option<CustomDelay>,
}

fn default_multiplier() -> f64 {
    2.0
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay_ms", &self.initial_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("multiplier", &self.multiplier)
            .field("jitter_ms", &self.jitter_ms)
            .field("strategy", &self.strategy)
            .field("custom_delay", &self.custom_delay.is_some())
            .finish()
    }
}

impl RetryConfig {
    pub fn exponential(max_attempts: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms,
            max_delay_ms,
            multiplier: default_multiplier(),
            jitter_ms: 0,
            strategy: BackoffStrategy::Exponential,
            custom_delay: None,
        }
    }

    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_jitter(mut self, jitter_ms: u64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_custom_delay(mut self, delay: impl Fn(u32) -> u64 + Send + Sync + 'static) -> Self {
        self.strategy = BackoffStrategy::Custom;
        self.custom_delay = Some(Arc::new(delay));
        self
    }

    /// Default profile for a retryable code, `None` for codes that are never retried.
    pub fn profile_for(code: ErrorCode) -> Option<Self> {
        let config = match code {
            ErrorCode::TimeoutError => Self::exponential(3, 1_000, 30_000).with_jitter(100),
            ErrorCode::NetworkError => Self::exponential(5, 2_000, 60_000).with_jitter(500),
            ErrorCode::RateLimitError => Self::exponential(4, 5_000, 60_000)
                .with_strategy(BackoffStrategy::Linear)
                .with_jitter(1_000),
            ErrorCode::AuthError => Self::exponential(2, 1_000, 10_000)
                .with_strategy(BackoffStrategy::Fibonacci)
                .with_jitter(100),
            _ => return None,
        };
        Some(config)
    }

    /// Delay before retrying after `attempt` (1-based) failed, without jitter, capped at the max.
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        let attempt = attempt.max(1);
        let initial = self.initial_delay_ms as f64;
        let raw = match self.strategy {
            BackoffStrategy::Exponential => {
                initial * self.multiplier.powi(attempt.saturating_sub(1).min(i32::MAX as u32) as i32)
            }
            BackoffStrategy::Linear => initial * attempt as f64,
            BackoffStrategy::Fibonacci => fibonacci(attempt) as f64 * initial,
            BackoffStrategy::Custom => match &self.custom_delay {
                Some(delay) => delay(attempt) as f64,
                None => initial,
            },
        };
        if !raw.is_finite() || raw >= self.max_delay_ms as f64 {
            self.max_delay_ms
        } else {
            raw.max(0.0) as u64
        }
    }

    /// Base delay plus uniform jitter in `[-jitter_ms, +jitter_ms]`, floored at zero.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms(attempt) as i64;
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            let span = self.jitter_ms.min(i64::MAX as u64) as i64;
            rand::thread_rng().gen_range(-span..=span)
        };
        Duration::from_millis(base.saturating_add(jitter).max(0) as u64)
    }
}

/// 1, 1, 2, 3, 5, ... for attempts 1, 2, 3, ...
fn fibonacci(n: u32) -> u64 {
    let (mut a, mut b) = (1u64, 1u64);
    for _ in 1..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exponential_doubles_until_cap() {
        let config = RetryConfig::exponential(5, 100, 1_000);
        let delays: Vec<u64> = (1..=6).map(|n| config.base_delay_ms(n)).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn linear_and_fibonacci() {
        let linear = RetryConfig::exponential(4, 5_000, 60_000).with_strategy(BackoffStrategy::Linear);
        assert_eq!(linear.base_delay_ms(3), 15_000);
        let fib = RetryConfig::exponential(5, 1_000, 10_000).with_strategy(BackoffStrategy::Fibonacci);
        let delays: Vec<u64> = (1..=6).map(|n| fib.base_delay_ms(n)).collect();
        assert_eq!(delays, vec![1_000, 1_000, 2_000, 3_000, 5_000, 8_000]);
        assert_eq!(fib.base_delay_ms(7), 10_000);
    }

    #[test]
    fn custom_is_capped() {
        let config = RetryConfig::exponential(3, 10, 500).with_custom_delay(|n| n as u64 * 300);
        assert_eq!(config.base_delay_ms(1), 300);
        assert_eq!(config.base_delay_ms(2), 500);
    }

    #[test]
    fn jitter_stays_in_range_and_never_negative() {
        let config = RetryConfig::exponential(3, 50, 1_000).with_jitter(100);
        for _ in 0..200 {
            let delay = config.calculate_delay(1).as_millis() as u64;
            assert!(delay <= 150);
        }
    }

    #[test]
    fn profiles_exist_only_for_retryable_codes() {
        for code in ErrorCode::ALL {
            assert_eq!(RetryConfig::profile_for(code).is_some(), code.is_retryable());
        }
        let rate = RetryConfig::profile_for(ErrorCode::RateLimitError).unwrap();
        assert_eq!(rate.strategy, BackoffStrategy::Linear);
        assert_eq!(rate.max_attempts, 4);
    }

    proptest! {
        #[test]
        fn exponential_is_monotonic_then_plateaus(
            initial in 1u64..5_000,
            max in 1u64..120_000,
            multiplier in 1.0f64..4.0,
            n in 1u32..40,
        ) {
            let config = RetryConfig::exponential(10, initial, max).with_multiplier(multiplier);
            let current = config.base_delay_ms(n);
            let next = config.base_delay_ms(n + 1);
            prop_assert!(next >= current);
            prop_assert!(next <= max);
        }
    }
}
