//! Alert and prediction records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert severity. Ordering is `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Source of an alert. Each type has its own Open/Acknowledged lifecycle per sensor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    /// Current value breached a configured threshold rule
    Threshold,
    /// Residual between actual and predicted value exceeded k·σ
    Anomaly,
    /// One-step-ahead forecast breached a configured threshold rule
    Prediction,
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertType::Threshold => write!(f, "threshold"),
            AlertType::Anomaly => write!(f, "anomaly"),
            AlertType::Prediction => write!(f, "prediction"),
        }
    }
}

/// Persisted alert row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: u64,
    pub sensor_id: String,
    pub alert_type: AlertType,
    pub threshold_value: Option<f64>,
    pub actual_value: f64,
    pub message: String,
    pub severity: Severity,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
    /// Last time an Open alert was refreshed by a later violating reading.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Number of violating readings folded into this occurrence.
    #[serde(default = "default_occurrences")]
    pub occurrences: u32,
}

fn default_occurrences() -> u32 {
    1
}

impl Alert {
    /// Unacknowledged alerts are Open; acknowledgement is terminal.
    pub fn is_open(&self) -> bool {
        !self.acknowledged
    }
}

/// Alert fields supplied by the detector; ids and timestamps are assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub sensor_id: String,
    pub alert_type: AlertType,
    pub threshold_value: Option<f64>,
    pub actual_value: f64,
    pub message: String,
    pub severity: Severity,
}

/// Persisted model output for one reading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    pub id: u64,
    pub sensor_id: String,
    pub predicted_value: f64,
    pub confidence: f64,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
    /// Timestamp of the reading the prediction was made for.
    #[serde(default)]
    pub reading_ts: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPrediction {
    pub sensor_id: String,
    pub predicted_value: f64,
    pub confidence: f64,
    pub model_version: String,
    pub reading_ts: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_low_to_critical() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
        assert_eq!(
            [Severity::Medium, Severity::Critical, Severity::Low].iter().max(),
            Some(&Severity::Critical)
        );
    }

    #[test]
    fn severity_serializes_lowercase_like_the_schema() {
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "\"critical\"");
        assert_eq!(serde_json::to_string(&AlertType::Anomaly).unwrap(), "\"anomaly\"");
    }
}
