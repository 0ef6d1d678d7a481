//! Advisory failure prediction from per-code occurrence timestamps.

use crate::recovery::classify::ErrorCode;
use crate::types::{millis_between, now, Timestamp};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

const MIN_SAMPLES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailurePrediction {
    pub code: ErrorCode,
    /// 0.0 to 1.0
    pub likelihood: f64,
    pub time_to_failure_ms: u64,
    pub mean_interval_ms: f64,
    pub samples: usize,
}

pub struct FailurePatterns {
    window: usize,
    occurrences: Mutex<HashMap<ErrorCode, VecDeque<Timestamp>>>,
}

impl FailurePatterns {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(MIN_SAMPLES),
            occurrences: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, code: ErrorCode, at: Timestamp) {
        let mut occurrences = self.occurrences.lock();
        let series = occurrences.entry(code).or_default();
        series.push_back(at);
        while series.len() > self.window {
            series.pop_front();
        }
    }

    pub fn samples(&self, code: ErrorCode) -> usize {
        self.occurrences.lock().get(&code).map_or(0, VecDeque::len)
    }

    /// `None` until at least three occurrences are known.
    pub fn predict(&self, code: ErrorCode) -> Option<FailurePrediction> {
        self.predict_at(code, now())
    }

    pub fn predict_at(&self, code: ErrorCode, at: Timestamp) -> Option<FailurePrediction> {
        let occurrences = self.occurrences.lock();
        let series = occurrences.get(&code)?;
        if series.len() < MIN_SAMPLES {
            return None;
        }
        let first = series.front()?;
        let last = series.back()?;
        let mean_interval_ms = millis_between(first, last) as f64 / (series.len() - 1) as f64;
        let since_last_ms = millis_between(last, &at) as f64;

        let likelihood = if mean_interval_ms <= 0.0 {
            1.0
        } else {
            (since_last_ms / mean_interval_ms).min(1.0)
        };
        Some(FailurePrediction {
            code,
            likelihood,
            time_to_failure_ms: (mean_interval_ms - since_last_ms).max(0.0) as u64,
            mean_interval_ms,
            samples: series.len(),
        })
    }
}
