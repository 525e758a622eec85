//! Shared data structures for the telemetry pipeline
//!
//! - Registry: `Asset`, `Sensor`, `SensorType`
//! - Ingestion: `RawReading` (collector record), `AcceptedReading`, `Reading`
//! - Derivation: `FeatureVector`
//! - Outputs: `Alert`, `Prediction`, `Severity`, `AlertType`

mod alert;
mod reading;
mod registry;

pub use alert::*;
pub use reading::*;
pub use registry::*;
