//! Telemetry Processing Pipeline
//!
//! ## Per-reading stages
//!
//! ```text
//! 1. Reading Validator     structural / timestamp / range flag / duplicate
//! 2. Persist reading       bounded retry, PersistenceFailed on exhaustion
//! 3. Feature Builder       lag1, lag2, roll3, hour from the sensor's window
//! 4. Threshold Evaluator ∥ Predictive Model Adapter
//! 5. Alert Manager         dedup, open/update, prediction row
//! ```
//!
//! Stages run inside the sensor's own worker; different sensors never share
//! mutable state.

pub mod features;
pub mod orchestrator;
pub mod processing_loop;
pub mod source;
pub mod thresholds;
pub mod validator;

pub use features::FeatureBuilder;
pub use orchestrator::{
    Orchestrator, PendingResult, PersistStage, PipelineStatus, ProcessingReport, ProcessingResult,
    SensorHealth, StartupError,
};
pub use processing_loop::{LoopStats, ProcessingLoop};
pub use source::{JsonLinesFileSource, ReadingEvent, ReadingSource, StdinSource};
pub use thresholds::{ThresholdEvaluator, ThresholdViolation};
pub use validator::{Validation, ValidationError};
