//! Ingestion records, stored readings and derived feature vectors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One ingestion record as produced by the collector: `{sensor_id, ts, value}`.
///
/// Fields are kept as raw JSON so the validator can report exactly which field
/// is missing or mistyped instead of failing on the first serde error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawReading {
    #[serde(default)]
    pub sensor_id: serde_json::Value,
    #[serde(default)]
    pub ts: serde_json::Value,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl RawReading {
    /// Build a well-formed record (used by in-process producers and tests).
    pub fn new(sensor_id: &str, ts: DateTime<Utc>, value: f64) -> Self {
        Self {
            sensor_id: serde_json::Value::String(sensor_id.to_string()),
            ts: serde_json::Value::String(ts.to_rfc3339()),
            value: serde_json::json!(value),
        }
    }

    /// Sensor id if present and a string; routing key for the per-sensor workers.
    pub fn sensor_key(&self) -> Option<&str> {
        self.sensor_id.as_str()
    }
}

/// A reading accepted by the validator, ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedReading {
    pub sensor_id: String,
    pub ts: DateTime<Utc>,
    pub value: f64,
    /// Value fell outside the sensor's configured `[min_value, max_value]`.
    pub out_of_range: bool,
}

/// Stored, immutable reading row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    pub id: u64,
    pub sensor_id: String,
    pub ts: DateTime<Utc>,
    pub value: f64,
    #[serde(default)]
    pub out_of_range: bool,
    pub created_at: DateTime<Utc>,
}

/// Model input derived from one sensor's reading stream.
///
/// `roll3` is the arithmetic mean of the last up-to-three values including the
/// current one; `roll3_samples` says how many values went into it. `lag1` and
/// `lag2` are `None` until enough history exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureVector {
    pub sensor_id: String,
    pub ts: DateTime<Utc>,
    pub value: f64,
    pub lag1: Option<f64>,
    pub lag2: Option<f64>,
    pub roll3: f64,
    pub roll3_samples: usize,
    pub hour: u32,
}

impl FeatureVector {
    /// All four model features are backed by real history (no cold-start gaps).
    pub fn is_complete(&self) -> bool {
        self.lag1.is_some() && self.lag2.is_some() && self.roll3_samples >= 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_reading_round_trips_through_ingestion_json() {
        let line = r#"{"sensor_id":"S_TEMP","ts":"2025-03-01T12:00:00Z","value":31.5}"#;
        let raw: RawReading = serde_json::from_str(line).unwrap();
        assert_eq!(raw.sensor_key(), Some("S_TEMP"));
        assert_eq!(raw.value.as_f64(), Some(31.5));
    }

    #[test]
    fn missing_fields_deserialize_as_null() {
        let raw: RawReading = serde_json::from_str(r#"{"sensor_id":"S_TEMP"}"#).unwrap();
        assert!(raw.ts.is_null());
        assert!(raw.value.is_null());
    }
}
