//! In-memory telemetry store for tests and ephemeral runs.
//!
//! Same constraints as the sled backend (unique `(sensor_id, ts)`, sensor and
//! asset integrity). Writes can be made to fail on purpose per relation so the
//! retry and compensation paths are testable without a broken disk.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{StorageError, TelemetryStore};
use crate::types::{
    AcceptedReading, Alert, Asset, NewAlert, NewPrediction, Prediction, Reading, Sensor,
};

/// Relation selector for injected write failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Readings,
    Alerts,
    Predictions,
}

#[derive(Default)]
struct Tables {
    assets: BTreeMap<String, Asset>,
    sensors: BTreeMap<String, Sensor>,
    readings: BTreeMap<(String, DateTime<Utc>), Reading>,
    alerts: BTreeMap<u64, Alert>,
    predictions: Vec<Prediction>,
    next_id: u64,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    failing_readings: AtomicU32,
    failing_alerts: AtomicU32,
    failing_predictions: AtomicU32,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes to `relation` fail with `Unavailable`.
    pub fn fail_next_writes(&self, relation: Relation, count: u32) {
        self.counter(relation).store(count, Ordering::SeqCst);
    }

    fn counter(&self, relation: Relation) -> &AtomicU32 {
        match relation {
            Relation::Readings => &self.failing_readings,
            Relation::Alerts => &self.failing_alerts,
            Relation::Predictions => &self.failing_predictions,
        }
    }

    fn check_write(&self, relation: Relation) -> Result<(), StorageError> {
        let injected = self
            .counter(relation)
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            Err(StorageError::Unavailable(format!("injected {relation:?} write failure")))
        } else {
            Ok(())
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StorageError> {
        self.tables
            .read()
            .map_err(|_| StorageError::Database("store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StorageError> {
        self.tables
            .write()
            .map_err(|_| StorageError::Database("store lock poisoned".into()))
    }
}

fn sensor_range(
    sensor_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> std::ops::RangeInclusive<(String, DateTime<Utc>)> {
    (sensor_id.to_string(), from)..=(sensor_id.to_string(), to)
}

impl TelemetryStore for InMemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn upsert_asset(&self, asset: &Asset) -> Result<(), StorageError> {
        self.write()?.assets.insert(asset.id.clone(), asset.clone());
        Ok(())
    }

    fn get_asset(&self, id: &str) -> Result<Option<Asset>, StorageError> {
        Ok(self.read()?.assets.get(id).cloned())
    }

    fn list_assets(&self) -> Result<Vec<Asset>, StorageError> {
        Ok(self.read()?.assets.values().cloned().collect())
    }

    fn upsert_sensor(&self, sensor: &Sensor) -> Result<(), StorageError> {
        let mut t = self.write()?;
        if !t.assets.contains_key(&sensor.asset_id) {
            return Err(StorageError::Integrity(format!(
                "sensor '{}' references unknown asset '{}'",
                sensor.id, sensor.asset_id
            )));
        }
        t.sensors.insert(sensor.id.clone(), sensor.clone());
        Ok(())
    }

    fn get_sensor(&self, id: &str) -> Result<Option<Sensor>, StorageError> {
        Ok(self.read()?.sensors.get(id).cloned())
    }

    fn list_sensors(&self) -> Result<Vec<Sensor>, StorageError> {
        Ok(self.read()?.sensors.values().cloned().collect())
    }

    fn insert_reading(&self, reading: &AcceptedReading) -> Result<Reading, StorageError> {
        self.check_write(Relation::Readings)?;
        let mut t = self.write()?;
        if !t.sensors.contains_key(&reading.sensor_id) {
            return Err(StorageError::Integrity(format!(
                "reading references unknown sensor '{}'",
                reading.sensor_id
            )));
        }
        let key = (reading.sensor_id.clone(), reading.ts);
        if t.readings.contains_key(&key) {
            return Err(StorageError::Conflict(format!(
                "reading ({}, {}) already stored",
                reading.sensor_id,
                reading.ts.to_rfc3339()
            )));
        }
        let row = Reading {
            id: t.next_id(),
            sensor_id: reading.sensor_id.clone(),
            ts: reading.ts,
            value: reading.value,
            out_of_range: reading.out_of_range,
            created_at: Utc::now(),
        };
        t.readings.insert(key, row.clone());
        Ok(row)
    }

    fn remove_reading(&self, sensor_id: &str, ts: DateTime<Utc>) -> Result<bool, StorageError> {
        Ok(self
            .write()?
            .readings
            .remove(&(sensor_id.to_string(), ts))
            .is_some())
    }

    fn reading_exists(&self, sensor_id: &str, ts: DateTime<Utc>) -> Result<bool, StorageError> {
        Ok(self.read()?.readings.contains_key(&(sensor_id.to_string(), ts)))
    }

    fn latest_reading(&self, sensor_id: &str) -> Result<Option<Reading>, StorageError> {
        Ok(self
            .read()?
            .readings
            .range(sensor_range(sensor_id, DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC))
            .next_back()
            .map(|(_, r)| r.clone()))
    }

    fn recent_readings(&self, sensor_id: &str, limit: usize) -> Result<Vec<Reading>, StorageError> {
        Ok(self
            .read()?
            .readings
            .range(sensor_range(sensor_id, DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC))
            .rev()
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect())
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
        Ok(self
            .read()?
            .readings
            .range(sensor_range(sensor_id, from, to))
            .map(|(_, r)| r.clone())
            .collect())
    }

    fn insert_alert(&self, alert: &NewAlert) -> Result<Alert, StorageError> {
        self.check_write(Relation::Alerts)?;
        let mut t = self.write()?;
        let row = Alert {
            id: t.next_id(),
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
        t.alerts.insert(row.id, row.clone());
        Ok(row)
    }

    fn update_alert(&self, alert: &Alert) -> Result<(), StorageError> {
        self.check_write(Relation::Alerts)?;
        let mut t = self.write()?;
        match t.alerts.get_mut(&alert.id) {
            Some(slot) => {
                *slot = alert.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("alert {}", alert.id))),
        }
    }

    fn remove_alert(&self, id: u64) -> Result<bool, StorageError> {
        Ok(self.write()?.alerts.remove(&id).is_some())
    }

    fn get_alert(&self, id: u64) -> Result<Option<Alert>, StorageError> {
        Ok(self.read()?.alerts.get(&id).cloned())
    }

    fn unacknowledged_alerts(&self, limit: Option<usize>) -> Result<Vec<Alert>, StorageError> {
        Ok(self
            .read()?
            .alerts
            .values()
            .rev()
            .filter(|a| a.is_open())
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn alerts_for_sensor(&self, sensor_id: &str, limit: Option<usize>) -> Result<Vec<Alert>, StorageError> {
        Ok(self
            .read()?
            .alerts
            .values()
            .rev()
            .filter(|a| a.sensor_id == sensor_id)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn insert_prediction(&self, prediction: &NewPrediction) -> Result<Prediction, StorageError> {
        self.check_write(Relation::Predictions)?;
        let mut t = self.write()?;
        let row = Prediction {
            id: t.next_id(),
            sensor_id: prediction.sensor_id.clone(),
            predicted_value: prediction.predicted_value,
            confidence: prediction.confidence,
            model_version: prediction.model_version.clone(),
            created_at: Utc::now(),
            reading_ts: prediction.reading_ts,
        };
        t.predictions.push(row.clone());
        Ok(row)
    }

    fn predictions_for_sensor(
        &self,
        sensor_id: &str,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Prediction>, StorageError> {
        Ok(self
            .read()?
            .predictions
            .iter()
            .rev()
            .filter(|p| p.sensor_id == sensor_id)
            .filter(|p| since.map_or(true, |s| p.created_at >= s))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SensorType;

    fn store_with_sensor() -> InMemoryStore {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .upsert_asset(&Asset {
                id: "LINE_MAIN".into(),
                name: "Main".into(),
                location: String::new(),
                created_at: now,
                updated_at: now,
            })
            .unwrap();
        store
            .upsert_sensor(&Sensor {
                id: "S_HUMIDITY".into(),
                asset_id: "LINE_MAIN".into(),
                name: "Humidity".into(),
                sensor_type: SensorType::Humidity,
                unit: "%".into(),
                min_value: 0.0,
                max_value: 100.0,
                created_at: now,
                updated_at: now,
            })
            .unwrap();
        store
    }

    #[test]
    fn sensor_requires_asset() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let err = store
            .upsert_sensor(&Sensor {
                id: "S".into(),
                asset_id: "GHOST".into(),
                name: "S".into(),
                sensor_type: SensorType::Vibration,
                unit: "mg".into(),
                min_value: 0.0,
                max_value: 1.0,
                created_at: now,
                updated_at: now,
            })
            .unwrap_err();
        assert!(matches!(err, StorageError::Integrity(_)));
    }

    #[test]
    fn injected_failures_are_consumed() {
        let store = store_with_sensor();
        store.fail_next_writes(Relation::Readings, 2);
        let reading = AcceptedReading {
            sensor_id: "S_HUMIDITY".into(),
            ts: Utc::now(),
            value: 50.0,
            out_of_range: false,
        };
        assert!(matches!(store.insert_reading(&reading), Err(StorageError::Unavailable(_))));
        assert!(matches!(store.insert_reading(&reading), Err(StorageError::Unavailable(_))));
        assert!(store.insert_reading(&reading).is_ok());
        assert!(matches!(store.insert_reading(&reading), Err(StorageError::Conflict(_))));
    }

    #[test]
    fn remove_reading_compensates_insert() {
        let store = store_with_sensor();
        let ts = Utc::now();
        let reading = AcceptedReading { sensor_id: "S_HUMIDITY".into(), ts, value: 50.0, out_of_range: false };
        store.insert_reading(&reading).unwrap();
        assert!(store.remove_reading("S_HUMIDITY", ts).unwrap());
        assert!(!store.reading_exists("S_HUMIDITY", ts).unwrap());
        assert!(store.latest_reading("S_HUMIDITY").unwrap().is_none());
    }
}
