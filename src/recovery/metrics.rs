//! Retry counters per error code.

use crate::recovery::classify::ErrorCode;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Coarse duration histogram buckets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryHistogram {
    pub under_1s: u64,
    pub under_5s: u64,
    pub under_30s: u64,
    pub over_30s: u64,
}

impl RetryHistogram {
    fn record(&mut self, elapsed: Duration) {
        let ms = elapsed.as_millis();
        let bucket = if ms < 1_000 {
            &mut self.under_1s
        } else if ms < 5_000 {
            &mut self.under_5s
        } else if ms < 30_000 {
            &mut self.under_30s
        } else {
            &mut self.over_30s
        };
        *bucket += 1;
    }
}

/// Monotonic retry counters.
///
/// `total_retries` counts attempts; `successful_retries` and `failed_retries` count whole
/// retry episodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryMetrics {
    pub total_retries: u64,
    pub successful_retries: u64,
    pub failed_retries: u64,
    pub average_retry_time_ms: f64,
    pub total_retry_time_ms: u64,
    pub histogram: RetryHistogram,
}

#[derive(Default)]
pub struct RetryMetricsRegistry {
    metrics: Mutex<BTreeMap<ErrorCode, RetryMetrics>>,
}

impl RetryMetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one attempt and the time it took.
    pub fn record_attempt(&self, code: ErrorCode, elapsed: Duration) {
        let mut metrics = self.metrics.lock();
        let entry = metrics.entry(code).or_default();
        entry.total_retries += 1;
        entry.total_retry_time_ms += elapsed.as_millis() as u64;
        entry.average_retry_time_ms =
            entry.total_retry_time_ms as f64 / entry.total_retries as f64;
        entry.histogram.record(elapsed);
    }

    /// Count the end of a retry episode.
    pub fn record_episode(&self, code: ErrorCode, succeeded: bool) {
        let mut metrics = self.metrics.lock();
        let entry = metrics.entry(code).or_default();
        if succeeded {
            entry.successful_retries += 1;
        } else {
            entry.failed_retries += 1;
        }
    }

    pub fn get(&self, code: ErrorCode) -> RetryMetrics {
        self.metrics.lock().get(&code).cloned().unwrap_or_default()
    }

    pub fn all(&self) -> BTreeMap<ErrorCode, RetryMetrics> {
        self.metrics.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_and_episodes_are_counted_separately() {
        let registry = RetryMetricsRegistry::new();
        let code = ErrorCode::TimeoutError;
        registry.record_attempt(code, Duration::from_millis(200));
        registry.record_attempt(code, Duration::from_millis(2_000));
        registry.record_attempt(code, Duration::from_secs(40));
        registry.record_episode(code, false);

        let metrics = registry.get(code);
        assert_eq!(metrics.total_retries, 3);
        assert_eq!(metrics.failed_retries, 1);
        assert_eq!(metrics.successful_retries, 0);
        assert_eq!(metrics.histogram.under_1s, 1);
        assert_eq!(metrics.histogram.under_5s, 1);
        assert_eq!(metrics.histogram.over_30s, 1);
        assert!((metrics.average_retry_time_ms - 14_066.666).abs() < 1.0);
    }

    #[test]
    fn unknown_code_reads_as_zero() {
        let registry = RetryMetricsRegistry::new();
        assert_eq!(registry.get(ErrorCode::AuthError), RetryMetrics::default());
    }
}
