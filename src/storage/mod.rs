//! Telemetry Storage
//!
//! The relational contract (asset, sensor, reading, alert, prediction) behind a
//! pluggable backend trait so pipeline code never touches a concrete engine:
//! - `SledStore`: durable store, one sled tree per relation
//! - `InMemoryStore`: tests and ephemeral runs
//!
//! Read views for the dashboard (latest reading, open alerts newest-first,
//! per-sensor aggregates) are plain queries on the same trait.

mod memory;
mod retry;
mod seed;
mod sled_store;

pub use memory::{InMemoryStore, Relation};
pub use retry::RetryPolicy;
pub use seed::seed_registry;
pub use sled_store::SledStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::types::{
    AcceptedReading, Alert, Asset, NewAlert, NewPrediction, Prediction, Reading, Sensor,
};

/// Storage errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Write would break a uniqueness constraint (e.g. `(sensor_id, ts)`).
    #[error("conflict: {0}")]
    Conflict(String),
    /// Write references a parent row that does not exist.
    #[error("integrity violation: {0}")]
    Integrity(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Backend temporarily unable to serve writes.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Only I/O-style failures are worth retrying; constraint errors never heal.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Database(_) | StorageError::Unavailable(_))
    }
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Per-sensor aggregate view: count, min/max/mean/stddev, first/last timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorStats {
    pub sensor_id: String,
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Sample standard deviation; `None` with fewer than two readings.
    pub stddev: Option<f64>,
    pub first_ts: DateTime<Utc>,
    pub last_ts: DateTime<Utc>,
}

impl SensorStats {
    /// Aggregate readings given oldest first. `None` for an empty slice.
    pub fn from_readings(sensor_id: &str, readings: &[Reading]) -> Option<Self> {
        let first = readings.first()?;
        let last = readings.last()?;
        let values: Vec<f64> = readings.iter().map(|r| r.value).collect();
        let stddev = if values.len() >= 2 {
            Some(Statistics::std_dev(values.iter()))
        } else {
            None
        };
        Some(Self {
            sensor_id: sensor_id.to_string(),
            count: values.len(),
            min: Statistics::min(values.iter()),
            max: Statistics::max(values.iter()),
            mean: Statistics::mean(values.iter()),
            stddev,
            first_ts: first.ts,
            last_ts: last.ts,
        })
    }
}

/// One row of the sensor summary report.
#[derive(Debug, Clone, Serialize)]
pub struct SensorSummary {
    pub sensor: Sensor,
    pub latest: Option<Reading>,
    pub stats: Option<SensorStats>,
    pub open_alerts: usize,
}

/// Latest reading, aggregates and open-alert count for every registered sensor.
pub fn sensor_summary(store: &dyn TelemetryStore) -> Result<Vec<SensorSummary>, StorageError> {
    let open = store.unacknowledged_alerts(None)?;
    store
        .list_sensors()?
        .into_iter()
        .map(|sensor| {
            Ok(SensorSummary {
                latest: store.latest_reading(&sensor.id)?,
                stats: store.sensor_stats(&sensor.id)?,
                open_alerts: open.iter().filter(|a| a.sensor_id == sensor.id).count(),
                sensor,
            })
        })
        .collect()
}

/// Storage contract consumed and produced by the pipeline.
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across per-sensor workers.
pub trait TelemetryStore: Send + Sync {
    /// Backend name for logging
    fn backend_name(&self) -> &'static str;

    // --- registry ---------------------------------------------------------

    fn upsert_asset(&self, asset: &Asset) -> Result<(), StorageError>;
    fn get_asset(&self, id: &str) -> Result<Option<Asset>, StorageError>;
    fn list_assets(&self) -> Result<Vec<Asset>, StorageError>;
    /// Fails with `Integrity` if the owning asset does not exist.
    fn upsert_sensor(&self, sensor: &Sensor) -> Result<(), StorageError>;
    fn get_sensor(&self, id: &str) -> Result<Option<Sensor>, StorageError>;
    fn list_sensors(&self) -> Result<Vec<Sensor>, StorageError>;

    // --- readings ---------------------------------------------------------

    /// Store an accepted reading. Fails with `Conflict` if `(sensor_id, ts)` exists.
    fn insert_reading(&self, reading: &AcceptedReading) -> Result<Reading, StorageError>;
    /// Remove a reading (compensation when downstream persistence fails).
    fn remove_reading(&self, sensor_id: &str, ts: DateTime<Utc>) -> Result<bool, StorageError>;
    fn reading_exists(&self, sensor_id: &str, ts: DateTime<Utc>) -> Result<bool, StorageError>;
    fn latest_reading(&self, sensor_id: &str) -> Result<Option<Reading>, StorageError>;
    /// Most recent readings, newest first.
    fn recent_readings(&self, sensor_id: &str, limit: usize) -> Result<Vec<Reading>, StorageError>;
    /// Readings with `from <= ts <= to`, oldest first.
    fn readings_between(
        &self,
        sensor_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Reading>, StorageError>;

    // --- alerts -----------------------------------------------------------

    fn insert_alert(&self, alert: &NewAlert) -> Result<Alert, StorageError>;
    /// Overwrite a stored alert; fails with `NotFound` for unknown ids.
    fn update_alert(&self, alert: &Alert) -> Result<(), StorageError>;
    /// Remove an alert (compensation for an alert raised by a rolled back reading).
    fn remove_alert(&self, id: u64) -> Result<bool, StorageError>;
    fn get_alert(&self, id: u64) -> Result<Option<Alert>, StorageError>;
    /// Unacknowledged alerts, newest first.
    fn unacknowledged_alerts(&self, limit: Option<usize>) -> Result<Vec<Alert>, StorageError>;
    /// All alerts of one sensor, newest first.
    fn alerts_for_sensor(&self, sensor_id: &str, limit: Option<usize>) -> Result<Vec<Alert>, StorageError>;

    // --- predictions ------------------------------------------------------

    fn insert_prediction(&self, prediction: &NewPrediction) -> Result<Prediction, StorageError>;
    /// Predictions of one sensor created at or after `since`, newest first.
    fn predictions_for_sensor(
        &self,
        sensor_id: &str,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Prediction>, StorageError>;

    // --- views ------------------------------------------------------------

    /// Aggregate statistics over every stored reading of a sensor.
    fn sensor_stats(&self, sensor_id: &str) -> Result<Option<SensorStats>, StorageError> {
        let readings =
            self.readings_between(sensor_id, DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)?;
        Ok(SensorStats::from_readings(sensor_id, &readings))
    }

    /// Make pending writes durable.
    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
