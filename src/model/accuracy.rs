//! Prediction accuracy: stored predictions vs. the readings that followed.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use statrs::statistics::Statistics;

use crate::config::defaults;
use crate::storage::{StorageError, TelemetryStore};
use crate::types::{Prediction, Reading};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AccuracyReport {
    pub sensor_id: String,
    pub hours: i64,
    /// Predictions that found a reading within the match tolerance
    pub total_predictions: usize,
    pub mean_error: f64,
    /// Sample stddev of absolute errors; `None` with a single match
    pub std_error: Option<f64>,
    pub max_error: f64,
    /// Share of matched predictions whose error is below the mean error
    pub accuracy_rate: f64,
}

/// Reading closest in time to `at`, if within `tolerance`. `readings` must be
/// sorted by timestamp.
fn nearest<'a>(readings: &'a [Reading], at: DateTime<Utc>, tolerance: Duration) -> Option<&'a Reading> {
    let idx = readings.partition_point(|r| r.ts < at);
    let after = readings.get(idx);
    let before = idx.checked_sub(1).and_then(|i| readings.get(i));
    [before, after]
        .into_iter()
        .flatten()
        .min_by_key(|r| (r.ts - at).abs())
        .filter(|r| (r.ts - at).abs() < tolerance)
}

/// Pair predictions with readings and summarize the absolute errors.
///
/// A prediction is matched against the timestamp of the reading it was made
/// for, falling back to its creation time.
pub fn summarize(
    sensor_id: &str,
    hours: i64,
    predictions: &[Prediction],
    readings: &[Reading],
    tolerance: Duration,
) -> Option<AccuracyReport> {
    let errors: Vec<f64> = predictions
        .iter()
        .filter_map(|p| {
            let at = p.reading_ts.unwrap_or(p.created_at);
            nearest(readings, at, tolerance).map(|r| (p.predicted_value - r.value).abs())
        })
        .collect();

    if errors.is_empty() {
        return None;
    }

    let mean_error = Statistics::mean(errors.iter());
    let below = errors.iter().filter(|&&e| e < mean_error).count();
    Some(AccuracyReport {
        sensor_id: sensor_id.to_string(),
        hours,
        total_predictions: errors.len(),
        mean_error,
        std_error: (errors.len() >= 2).then(|| Statistics::std_dev(errors.iter())),
        max_error: Statistics::max(errors.iter()),
        accuracy_rate: below as f64 / errors.len() as f64,
    })
}

/// Start of a look-back window of `hours` hours ending at `now`, or `None`
/// when the window reaches past the representable range.
pub fn window_start(now: DateTime<Utc>, hours: i64) -> Option<DateTime<Utc>> {
    Duration::try_hours(hours).and_then(|span| now.checked_sub_signed(span))
}

/// Accuracy over the predictions of the last `hours` hours. A window longer
/// than the representable range covers all stored history.
pub fn prediction_accuracy(
    store: &dyn TelemetryStore,
    sensor_id: &str,
    hours: i64,
    now: DateTime<Utc>,
) -> Result<Option<AccuracyReport>, StorageError> {
    let tolerance = Duration::seconds(defaults::ACCURACY_MATCH_TOLERANCE_SECS);
    let since = window_start(now, hours).unwrap_or(DateTime::<Utc>::MIN_UTC);
    let predictions = store.predictions_for_sensor(sensor_id, Some(since), None)?;
    if predictions.is_empty() {
        return Ok(None);
    }
    let from = since.checked_sub_signed(tolerance).unwrap_or(since);
    let to = now.checked_add_signed(tolerance).unwrap_or(now);
    let readings = store.readings_between(sensor_id, from, to)?;
    Ok(summarize(sensor_id, hours, &predictions, &readings, tolerance))
}
