//! Reading Validator
//!
//! Checks, in order:
//! 1. `sensor_id`, `ts`, `value` present and well-typed, value finite
//! 2. `ts` is a valid instant (RFC 3339; offset-less ISO-8601 is taken as UTC)
//! 3. value within the sensor's `[min_value, max_value]`, else accepted with
//!    `out_of_range = true`
//! 4. `(sensor_id, ts)` not already stored
//!
//! No side effects: persistence happens in the orchestrator after acceptance.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::storage::{StorageError, TelemetryStore};
use crate::types::{AcceptedReading, RawReading, Sensor};

#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("missing field '{field}'")]
    MissingField { field: &'static str },
    #[error("field '{field}' must be {expected}")]
    WrongType { field: &'static str, expected: &'static str },
    #[error("value {value} is not a finite number")]
    NonFiniteValue { value: String },
    #[error("invalid timestamp '{raw}': {reason}")]
    InvalidTimestamp { raw: String, reason: String },
    #[error("unknown sensor '{sensor_id}'")]
    UnknownSensor { sensor_id: String },
    #[error("duplicate reading for '{sensor_id}' at {ts}")]
    Duplicate { sensor_id: String, ts: DateTime<Utc> },
    #[error("reading for '{sensor_id}' at {ts} is older than latest stored {latest}")]
    OutOfOrder {
        sensor_id: String,
        ts: DateTime<Utc>,
        latest: DateTime<Utc>,
    },
}

/// Validator verdict for one reading.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Accepted(AcceptedReading),
    Rejected(ValidationError),
}

/// Routing key of a raw record; fails the same way full validation would.
pub fn sensor_id(raw: &RawReading) -> Result<&str, ValidationError> {
    match &raw.sensor_id {
        Value::Null => Err(ValidationError::MissingField { field: "sensor_id" }),
        Value::String(s) if s.trim().is_empty() => Err(ValidationError::MissingField { field: "sensor_id" }),
        Value::String(s) => Ok(s.as_str()),
        _ => Err(ValidationError::WrongType { field: "sensor_id", expected: "a string" }),
    }
}

fn value(raw: &RawReading) -> Result<f64, ValidationError> {
    match &raw.value {
        Value::Null => Err(ValidationError::MissingField { field: "value" }),
        Value::Number(n) => match n.as_f64() {
            Some(v) if v.is_finite() => Ok(v),
            _ => Err(ValidationError::NonFiniteValue { value: n.to_string() }),
        },
        _ => Err(ValidationError::WrongType { field: "value", expected: "a number" }),
    }
}

/// RFC 3339 with offset, or an offset-less ISO-8601 date-time taken as UTC.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, ValidationError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(ValidationError::InvalidTimestamp {
        raw: s.to_string(),
        reason: "expected an ISO-8601 date-time".to_string(),
    })
}

fn timestamp(raw: &RawReading) -> Result<DateTime<Utc>, ValidationError> {
    match &raw.ts {
        Value::Null => Err(ValidationError::MissingField { field: "ts" }),
        Value::String(s) => parse_timestamp(s.trim()),
        _ => Err(ValidationError::WrongType { field: "ts", expected: "an ISO-8601 string" }),
    }
}

/// Structural and range checks against a registered sensor. Pure.
pub fn check_fields(raw: &RawReading, sensor: &Sensor) -> Result<AcceptedReading, ValidationError> {
    let sensor_id = sensor_id(raw)?;
    if sensor_id != sensor.id {
        return Err(ValidationError::UnknownSensor { sensor_id: sensor_id.to_string() });
    }
    let value = value(raw)?;
    let ts = timestamp(raw)?;
    Ok(AcceptedReading {
        sensor_id: sensor.id.clone(),
        ts,
        value,
        out_of_range: !sensor.in_range(value),
    })
}

/// Full validation including the duplicate lookup.
///
/// `Err` means the store could not be consulted, not that the reading is bad.
pub fn validate(
    raw: &RawReading,
    sensor: &Sensor,
    store: &dyn TelemetryStore,
) -> Result<Validation, StorageError> {
    let accepted = match check_fields(raw, sensor) {
        Ok(a) => a,
        Err(e) => return Ok(Validation::Rejected(e)),
    };
    if store.reading_exists(&accepted.sensor_id, accepted.ts)? {
        return Ok(Validation::Rejected(ValidationError::Duplicate {
            sensor_id: accepted.sensor_id,
            ts: accepted.ts,
        }));
    }
    Ok(Validation::Accepted(accepted))
}
