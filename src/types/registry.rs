//! Asset and sensor registry types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Physical equipment or production line that owns one or more sensors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Asset {
    pub id: String,
    pub name: String,
    pub location: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Measurement family of a sensor. Selects the threshold rules and the model binding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    Temperature,
    Humidity,
    Vibration,
    Luminosity,
}

impl SensorType {
    pub const ALL: [SensorType; 4] = [
        SensorType::Temperature,
        SensorType::Humidity,
        SensorType::Vibration,
        SensorType::Luminosity,
    ];

    /// Lowercase name used in config tables and the storage schema.
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorType::Temperature => "temperature",
            SensorType::Humidity => "humidity",
            SensorType::Vibration => "vibration",
            SensorType::Luminosity => "luminosity",
        }
    }
}

impl std::fmt::Display for SensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SensorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "temperature" => Ok(SensorType::Temperature),
            "humidity" => Ok(SensorType::Humidity),
            "vibration" => Ok(SensorType::Vibration),
            "luminosity" => Ok(SensorType::Luminosity),
            other => Err(format!("unknown sensor type '{other}'")),
        }
    }
}

/// One typed measurement stream bound to exactly one asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sensor {
    pub id: String,
    pub asset_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    pub unit: String,
    pub min_value: f64,
    pub max_value: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sensor {
    /// Whether a value lies inside the configured physical range (inclusive).
    pub fn in_range(&self, value: f64) -> bool {
        value >= self.min_value && value <= self.max_value
    }
}
