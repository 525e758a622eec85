//! telemetry-sentinel: industrial sensor telemetry pipeline
//!
//! Turns periodic sensor readings into validated time-series rows, short
//! horizon predictions and severity-classified alerts.
//!
//! ## Architecture
//!
//! - **Pipeline**: per-sensor workers running validate → persist → features
//!   → (thresholds ∥ model) → alerts
//! - **Model**: linear regression artifacts applied per sensor type, with
//!   residual-based anomaly detection, multi-step forecast and accuracy reports
//! - **Alerts**: per (sensor, alert type) dedup and acknowledgement lifecycle
//! - **Storage**: `TelemetryStore` contract over sled (or memory for tests)
//! - **API**: read views and HTTP ingestion over axum

pub mod alerts;
pub mod api;
pub mod config;
pub mod model;
pub mod pipeline;
pub mod storage;
pub mod types;

// Re-export configuration
pub use config::{ConfigError, SentinelConfig};

// Re-export the pipeline entry points
pub use pipeline::{Orchestrator, ProcessingResult, StartupError};

// Re-export storage
pub use storage::{InMemoryStore, SledStore, StorageError, TelemetryStore};

// Re-export commonly used types
pub use types::{
    Alert, AlertType, Asset, FeatureVector, Prediction, RawReading, Reading, Sensor, SensorType,
    Severity,
};
