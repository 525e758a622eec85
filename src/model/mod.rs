//! Predictive models
//!
//! Trained models are loaded once at startup (one per sensor type) and shared
//! read-only across all per-sensor workers. The pipeline only applies them;
//! fitting happens offline.
//!
//! - `RegressionModel`: the seam every model implements
//! - `LinearModel`: JSON linear artifact over `[lag1, lag2, roll3, hour]`
//! - `PredictiveModelAdapter`: timeouts, cold-start skips, anomaly scoring, forecasts
//! - `accuracy`: prediction-vs-actual report

pub mod accuracy;
mod adapter;
mod linear;

pub use accuracy::{prediction_accuracy, window_start, AccuracyReport};
pub use adapter::{
    AnomalySignal, ForecastPoint, ModelPrediction, PredictionOutcome, PredictiveModelAdapter,
    SkipReason,
};
pub use linear::{Coefficients, LinearArtifact, LinearModel};

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::config::{ConfigError, ModelBindings};
use crate::types::{FeatureVector, SensorType};

/// Model errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    #[error("model produced a non-finite value: {0}")]
    NonFinite(String),
    #[error("model failed: {0}")]
    Failed(String),
    #[error("no model bound for sensor type '{0}'")]
    Unbound(SensorType),
    #[error("need {needed} readings of history, have {have}")]
    InsufficientHistory { needed: usize, have: usize },
}

/// Numeric model input, only built from complete feature vectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelInput {
    pub lag1: f64,
    pub lag2: f64,
    pub roll3: f64,
    pub hour: f64,
}

impl ModelInput {
    /// `None` while the vector still has cold-start gaps.
    pub fn from_features(features: &FeatureVector) -> Option<Self> {
        if !features.is_complete() {
            return None;
        }
        Some(Self {
            lag1: features.lag1?,
            lag2: features.lag2?,
            roll3: features.roll3,
            hour: f64::from(features.hour),
        })
    }
}

/// Raw model output. Confidence is the model's own estimate and is NOT
/// trusted to lie in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelOutput {
    pub value: f64,
    pub confidence: f64,
}

/// A trained regression model. Implementations are immutable after load.
pub trait RegressionModel: Send + Sync {
    fn version(&self) -> &str;

    /// Residual scale σ observed at training time.
    fn residual_sigma(&self) -> f64;

    fn predict(&self, input: &ModelInput) -> Result<ModelOutput, ModelError>;
}

/// Sensor type → loaded model.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<SensorType, Arc<dyn RegressionModel>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every configured binding. A missing or broken artifact is fatal.
    pub fn from_bindings(bindings: &ModelBindings) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for sensor_type in SensorType::ALL {
            let Some(binding) = bindings.binding_for(sensor_type) else {
                continue;
            };
            let artifact = match (&binding.artifact, &binding.inline) {
                (Some(path), None) => LinearArtifact::load(path),
                (None, Some(inline)) => inline.check().map(|_| inline.clone()),
                _ => Err("set exactly one of 'artifact' or 'inline'".to_string()),
            }
            .map_err(|reason| ConfigError::ModelArtifact { sensor_type, reason })?;

            info!(
                sensor_type = %sensor_type,
                version = %artifact.version,
                sigma = artifact.residual_sigma,
                "Model loaded"
            );
            registry.insert(sensor_type, Arc::new(LinearModel::new(artifact)));
        }
        Ok(registry)
    }

    pub fn insert(&mut self, sensor_type: SensorType, model: Arc<dyn RegressionModel>) {
        self.models.insert(sensor_type, model);
    }

    pub fn get(&self, sensor_type: SensorType) -> Option<Arc<dyn RegressionModel>> {
        self.models.get(&sensor_type).cloned()
    }

    pub fn contains(&self, sensor_type: SensorType) -> bool {
        self.models.contains_key(&sensor_type)
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.models.keys().collect();
        types.sort();
        f.debug_struct("ModelRegistry").field("types", &types).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelBinding;
    use chrono::Utc;
    use std::io::Write;

    fn features(lag1: Option<f64>, lag2: Option<f64>, samples: usize) -> FeatureVector {
        FeatureVector {
            sensor_id: "S_TEMP".into(),
            ts: Utc::now(),
            value: 36.0,
            lag1,
            lag2,
            roll3: 32.0,
            roll3_samples: samples,
            hour: 14,
        }
    }

    #[test]
    fn model_input_requires_full_history() {
        assert!(ModelInput::from_features(&features(Some(31.0), None, 2)).is_none());
        let input = ModelInput::from_features(&features(Some(31.0), Some(30.0), 3)).unwrap();
        assert_eq!(input.hour, 14.0);
        assert_eq!(input.lag2, 30.0);
    }

    #[test]
    fn default_bindings_cover_every_type() {
        let registry = ModelRegistry::from_bindings(&ModelBindings::default()).unwrap();
        for t in SensorType::ALL {
            assert!(registry.contains(t), "{t} not bound");
        }
        assert_eq!(registry.get(SensorType::Humidity).unwrap().residual_sigma(), 4.0);
    }

    #[test]
    fn artifact_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"version":"rf-1","intercept":1.0,"coefficients":{{"lag1":0.9}},"residual_sigma":0.5}}"#
        )
        .unwrap();
        let bindings = ModelBindings {
            temperature: Some(ModelBinding { artifact: Some(file.path().to_path_buf()), inline: None }),
            humidity: None,
            vibration: None,
            luminosity: None,
        };
        let registry = ModelRegistry::from_bindings(&bindings).unwrap();
        assert_eq!(registry.get(SensorType::Temperature).unwrap().version(), "rf-1");
        assert!(registry.get(SensorType::Humidity).is_none());
    }

    #[test]
    fn missing_artifact_is_a_config_error() {
        let bindings = ModelBindings {
            temperature: None,
            humidity: None,
            vibration: Some(ModelBinding {
                artifact: Some("/nonexistent/vibration.json".into()),
                inline: None,
            }),
            luminosity: None,
        };
        match ModelRegistry::from_bindings(&bindings) {
            Err(ConfigError::ModelArtifact { sensor_type, .. }) => {
                assert_eq!(sensor_type, SensorType::Vibration)
            }
            other => panic!("expected ModelArtifact error, got {other:?}"),
        }
    }
}
