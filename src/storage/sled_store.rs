//! sled-backed telemetry store
//!
//! One tree per relation. Keys are chosen so that sled's byte ordering gives
//! the access patterns for free:
//!
//! - `readings`: `sensor_id \0 secs(be, sign-flipped) nanos(be)` so a prefix
//!   scan yields one sensor's readings in timestamp order
//! - `alerts`: `id(be)`, newest last
//! - `predictions`: `sensor_id \0 id(be)`
//! - `assets` / `sensors`: plain id

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sled::IVec;
use std::path::Path;
use tracing::info;

use super::{StorageError, TelemetryStore};
use crate::types::{
    AcceptedReading, Alert, Asset, NewAlert, NewPrediction, Prediction, Reading, Sensor,
};

/// Durable store on a sled database directory.
pub struct SledStore {
    db: sled::Db,
    assets: sled::Tree,
    sensors: sled::Tree,
    readings: sled::Tree,
    alerts: sled::Tree,
    predictions: sled::Tree,
}

impl SledStore {
    /// Open (or create) a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Telemetry store opened");
        Self::from_db(db)
    }

    /// Throwaway store removed on drop (tests, dry runs).
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StorageError> {
        Ok(Self {
            assets: db.open_tree("assets")?,
            sensors: db.open_tree("sensors")?,
            readings: db.open_tree("readings")?,
            alerts: db.open_tree("alerts")?,
            predictions: db.open_tree("predictions")?,
            db,
        })
    }

    /// Drop every row in every relation.
    pub fn clear(&self) -> Result<(), StorageError> {
        for tree in [&self.assets, &self.sensors, &self.readings, &self.alerts, &self.predictions] {
            tree.clear()?;
        }
        self.db.flush()?;
        info!("Telemetry store cleared");
        Ok(())
    }

    /// Database size on disk in bytes
    pub fn size_on_disk(&self) -> u64 {
        self.db.size_on_disk().unwrap_or(0)
    }
}

// ============================================================================
// Key encoding
// ============================================================================

fn sensor_prefix(sensor_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(sensor_id.len() + 13);
    key.extend_from_slice(sensor_id.as_bytes());
    key.push(0);
    key
}

/// Flipping the sign bit makes big-endian i64 sort the same as the number.
fn ts_bytes(ts: DateTime<Utc>) -> [u8; 12] {
    let secs = (ts.timestamp() as u64) ^ (1 << 63);
    let mut out = [0u8; 12];
    out[..8].copy_from_slice(&secs.to_be_bytes());
    out[8..].copy_from_slice(&ts.timestamp_subsec_nanos().to_be_bytes());
    out
}

fn reading_key(sensor_id: &str, ts: DateTime<Utc>) -> Vec<u8> {
    let mut key = sensor_prefix(sensor_id);
    key.extend_from_slice(&ts_bytes(ts));
    key
}

fn prediction_key(sensor_id: &str, id: u64) -> Vec<u8> {
    let mut key = sensor_prefix(sensor_id);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn decode_all<T, I>(iter: I, limit: Option<usize>) -> Result<Vec<T>, StorageError>
where
    T: DeserializeOwned,
    I: Iterator<Item = sled::Result<(IVec, IVec)>>,
{
    let mut out = Vec::new();
    for item in iter.take(limit.unwrap_or(usize::MAX)) {
        let (_, value) = item?;
        out.push(decode(&value)?);
    }
    Ok(out)
}

// ============================================================================
// TelemetryStore
// ============================================================================

impl TelemetryStore for SledStore {
    fn backend_name(&self) -> &'static str {
        "sled"
    }

    fn upsert_asset(&self, asset: &Asset) -> Result<(), StorageError> {
        self.assets.insert(asset.id.as_bytes(), serde_json::to_vec(asset)?)?;
        Ok(())
    }

    fn get_asset(&self, id: &str) -> Result<Option<Asset>, StorageError> {
        self.assets.get(id.as_bytes())?.map(|v| decode(&v)).transpose()
    }

    fn list_assets(&self) -> Result<Vec<Asset>, StorageError> {
        decode_all(self.assets.iter(), None)
    }

    fn upsert_sensor(&self, sensor: &Sensor) -> Result<(), StorageError> {
        if !self.assets.contains_key(sensor.asset_id.as_bytes())? {
            return Err(StorageError::Integrity(format!(
                "sensor '{}' references unknown asset '{}'",
                sensor.id, sensor.asset_id
            )));
        }
        self.sensors.insert(sensor.id.as_bytes(), serde_json::to_vec(sensor)?)?;
        Ok(())
    }

    fn get_sensor(&self, id: &str) -> Result<Option<Sensor>, StorageError> {
        self.sensors.get(id.as_bytes())?.map(|v| decode(&v)).transpose()
    }

    fn list_sensors(&self) -> Result<Vec<Sensor>, StorageError> {
        decode_all(self.sensors.iter(), None)
    }

    fn insert_reading(&self, reading: &AcceptedReading) -> Result<Reading, StorageError> {
        if !self.sensors.contains_key(reading.sensor_id.as_bytes())? {
            return Err(StorageError::Integrity(format!(
                "reading references unknown sensor '{}'",
                reading.sensor_id
            )));
        }
        let row = Reading {
            id: self.db.generate_id()?,
            sensor_id: reading.sensor_id.clone(),
            ts: reading.ts,
            value: reading.value,
            out_of_range: reading.out_of_range,
            created_at: Utc::now(),
        };
        let key = reading_key(&row.sensor_id, row.ts);
        let swapped = self
            .readings
            .compare_and_swap(key, None as Option<&[u8]>, Some(serde_json::to_vec(&row)?))?;
        match swapped {
            Ok(()) => Ok(row),
            Err(_) => Err(StorageError::Conflict(format!(
                "reading ({}, {}) already stored",
                row.sensor_id,
                row.ts.to_rfc3339()
            ))),
        }
    }

    fn remove_reading(&self, sensor_id: &str, ts: DateTime<Utc>) -> Result<bool, StorageError> {
        Ok(self.readings.remove(reading_key(sensor_id, ts))?.is_some())
    }

    fn reading_exists(&self, sensor_id: &str, ts: DateTime<Utc>) -> Result<bool, StorageError> {
        Ok(self.readings.contains_key(reading_key(sensor_id, ts))?)
    }

    fn latest_reading(&self, sensor_id: &str) -> Result<Option<Reading>, StorageError> {
        match self.readings.scan_prefix(sensor_prefix(sensor_id)).next_back() {
            Some(item) => {
                let (_, value) = item?;
                Ok(Some(decode(&value)?))
            }
            None => Ok(None),
        }
    }

    fn recent_readings(&self, sensor_id: &str, limit: usize) -> Result<Vec<Reading>, StorageError> {
        decode_all(self.readings.scan_prefix(sensor_prefix(sensor_id)).rev(), Some(limit))
    }

    fn readings_between(
        &self,
        sensor_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Reading>, StorageError> {
        if from > to {
            return Ok(Vec::new());
        }
        let start = reading_key(sensor_id, from);
        let end = reading_key(sensor_id, to);
        decode_all(self.readings.range(start..=end), None)
    }

    fn insert_alert(&self, alert: &NewAlert) -> Result<Alert, StorageError> {
        let row = Alert {
            id: self.db.generate_id()?,
            sensor_id: alert.sensor_id.clone(),
            alert_type: alert.alert_type,
            threshold_value: alert.threshold_value,
            actual_value: alert.actual_value,
            message: alert.message.clone(),
            severity: alert.severity,
            acknowledged: false,
            created_at: Utc::now(),
            updated_at: None,
            occurrences: 1,
        };
        self.alerts.insert(row.id.to_be_bytes(), serde_json::to_vec(&row)?)?;
        Ok(row)
    }

    fn update_alert(&self, alert: &Alert) -> Result<(), StorageError> {
        let key = alert.id.to_be_bytes();
        if !self.alerts.contains_key(key)? {
            return Err(StorageError::NotFound(format!("alert {}", alert.id)));
        }
        self.alerts.insert(key, serde_json::to_vec(alert)?)?;
        Ok(())
    }

    fn remove_alert(&self, id: u64) -> Result<bool, StorageError> {
        Ok(self.alerts.remove(id.to_be_bytes())?.is_some())
    }

    fn get_alert(&self, id: u64) -> Result<Option<Alert>, StorageError> {
        self.alerts.get(id.to_be_bytes())?.map(|v| decode(&v)).transpose()
    }

    fn unacknowledged_alerts(&self, limit: Option<usize>) -> Result<Vec<Alert>, StorageError> {
        let mut out = Vec::new();
        for item in self.alerts.iter().rev() {
            if limit.is_some_and(|l| out.len() >= l) {
                break;
            }
            let (_, value) = item?;
            let alert: Alert = decode(&value)?;
            if alert.is_open() {
                out.push(alert);
            }
        }
        Ok(out)
    }

    fn alerts_for_sensor(&self, sensor_id: &str, limit: Option<usize>) -> Result<Vec<Alert>, StorageError> {
        let mut out = Vec::new();
        for item in self.alerts.iter().rev() {
            if limit.is_some_and(|l| out.len() >= l) {
                break;
            }
            let (_, value) = item?;
            let alert: Alert = decode(&value)?;
            if alert.sensor_id == sensor_id {
                out.push(alert);
            }
        }
        Ok(out)
    }

    fn insert_prediction(&self, prediction: &NewPrediction) -> Result<Prediction, StorageError> {
        let row = Prediction {
            id: self.db.generate_id()?,
            sensor_id: prediction.sensor_id.clone(),
            predicted_value: prediction.predicted_value,
            confidence: prediction.confidence,
            model_version: prediction.model_version.clone(),
            created_at: Utc::now(),
            reading_ts: prediction.reading_ts,
        };
        self.predictions
            .insert(prediction_key(&row.sensor_id, row.id), serde_json::to_vec(&row)?)?;
        Ok(row)
    }

    fn predictions_for_sensor(
        &self,
        sensor_id: &str,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Prediction>, StorageError> {
        let mut out = Vec::new();
        for item in self.predictions.scan_prefix(sensor_prefix(sensor_id)).rev() {
            if limit.is_some_and(|l| out.len() >= l) {
                break;
            }
            let (_, value) = item?;
            let prediction: Prediction = decode(&value)?;
            // ids grow with time, so the first row older than `since` ends the scan
            if since.is_some_and(|s| prediction.created_at < s) {
                break;
            }
            out.push(prediction);
        }
        Ok(out)
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}
