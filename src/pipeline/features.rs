//! Feature Builder
//!
//! One builder per sensor, owned exclusively by that sensor's worker.
//!
//! For a reading with value `v` at time `t`:
//! - `lag1`: previous value, `None` for the first reading
//! - `lag2`: value two readings back, `None` for the first two readings
//! - `roll3`: arithmetic mean of the last up-to-3 values *including* `v`;
//!   over 1 or 2 values during cold start (`roll3_samples` says which)
//! - `hour`: hour-of-day of `t` in UTC
//!
//! `derive` is pure; `advance` commits the value once the reading has been
//! fully processed, so a failed reading leaves the window untouched.

use chrono::{DateTime, Timelike, Utc};
use std::collections::VecDeque;

use crate::config::defaults::FEATURE_WINDOW_SIZE;
use crate::types::{FeatureVector, Reading};

#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    sensor_id: String,
    window: VecDeque<f64>,
    last_ts: Option<DateTime<Utc>>,
}

impl FeatureBuilder {
    pub fn new(sensor_id: &str) -> Self {
        Self {
            sensor_id: sensor_id.to_string(),
            window: VecDeque::with_capacity(FEATURE_WINDOW_SIZE),
            last_ts: None,
        }
    }

    /// Resume from stored history (newest first, as `recent_readings` returns it).
    pub fn warm_start(sensor_id: &str, recent: &[Reading]) -> Self {
        let mut builder = Self::new(sensor_id);
        for r in recent.iter().take(FEATURE_WINDOW_SIZE).rev() {
            builder.push(r.ts, r.value);
        }
        builder
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    /// Timestamp of the last committed reading.
    pub fn last_ts(&self) -> Option<DateTime<Utc>> {
        self.last_ts
    }

    /// Committed values, oldest first.
    pub fn values(&self) -> Vec<f64> {
        self.window.iter().copied().collect()
    }

    pub fn derive(&self, ts: DateTime<Utc>, value: f64) -> FeatureVector {
        let n = self.window.len();
        let lag1 = self.window.back().copied();
        let lag2 = n.checked_sub(2).and_then(|i| self.window.get(i)).copied();

        let prior = self.window.iter().skip(n.saturating_sub(FEATURE_WINDOW_SIZE - 1));
        let (sum, count) = prior.fold((value, 1usize), |(s, c), v| (s + v, c + 1));

        FeatureVector {
            sensor_id: self.sensor_id.clone(),
            ts,
            value,
            lag1,
            lag2,
            roll3: sum / count as f64,
            roll3_samples: count,
            hour: ts.hour(),
        }
    }

    /// Commit a processed reading.
    pub fn advance(&mut self, features: &FeatureVector) {
        self.push(features.ts, features.value);
    }

    fn push(&mut self, ts: DateTime<Utc>, value: f64) {
        if self.window.len() == FEATURE_WINDOW_SIZE {
            self.window.pop_front();
        }
        self.window.push_back(value);
        self.last_ts = Some(ts);
    }
}
