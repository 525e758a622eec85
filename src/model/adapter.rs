//! Predictive Model Adapter
//!
//! Wraps the model registry for the pipeline. Prediction is best-effort:
//! every failure mode turns into a `Skipped` outcome and the reading falls
//! back to threshold-only evaluation.

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::{ModelError, ModelInput, ModelOutput, ModelRegistry, RegressionModel};
use crate::types::{FeatureVector, Reading, SensorType, Severity};

/// Why no prediction was produced for a reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// Cold start: lag2 or a full roll3 window is not available yet.
    InsufficientHistory,
    /// Inference exceeded the configured timeout.
    Timeout,
    /// Model returned an error or a non-finite value.
    ModelFailure(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::InsufficientHistory => write!(f, "insufficient history"),
            SkipReason::Timeout => write!(f, "inference timed out"),
            SkipReason::ModelFailure(e) => write!(f, "model failure: {e}"),
        }
    }
}

/// Residual larger than k·σ.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalySignal {
    pub residual: f64,
    pub sigma: f64,
    /// residual / σ
    pub normalized: f64,
    /// `medium` above k·σ, `high` above 2k·σ
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelPrediction {
    pub predicted_value: f64,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub model_version: String,
    /// Raw confidence when the model reported one outside `[0, 1]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_defect: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<AnomalySignal>,
    /// One-step-ahead forecast from the current reading.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PredictionOutcome {
    Predicted(ModelPrediction),
    Skipped(SkipReason),
}

/// One point of a multi-step forecast.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub step: usize,
    pub ts: DateTime<Utc>,
    pub predicted_value: f64,
    pub confidence: f64,
}

/// Applies per-type models to feature vectors.
#[derive(Debug, Clone)]
pub struct PredictiveModelAdapter {
    registry: Arc<ModelRegistry>,
    timeout: Duration,
    sigma_multiple: f64,
    step: ChronoDuration,
}

impl PredictiveModelAdapter {
    pub fn new(
        registry: Arc<ModelRegistry>,
        timeout: Duration,
        sigma_multiple: f64,
        step: ChronoDuration,
    ) -> Self {
        Self { registry, timeout, sigma_multiple, step }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Predict the current value from its feature vector, score the residual
    /// and forecast one step ahead.
    pub async fn predict(&self, sensor_type: SensorType, features: &FeatureVector) -> PredictionOutcome {
        let sensor_id = features.sensor_id.as_str();

        let Some(input) = ModelInput::from_features(features) else {
            debug!(sensor_id, "Prediction skipped: insufficient history");
            return PredictionOutcome::Skipped(SkipReason::InsufficientHistory);
        };
        let Some(model) = self.registry.get(sensor_type) else {
            let reason = ModelError::Unbound(sensor_type).to_string();
            warn!(sensor_id, %reason, "Prediction skipped");
            return PredictionOutcome::Skipped(SkipReason::ModelFailure(reason));
        };

        let next_input = ModelInput {
            lag1: features.value,
            lag2: input.lag1,
            roll3: features.roll3,
            hour: f64::from((features.ts + self.step).hour()),
        };

        let worker = Arc::clone(&model);
        let inference = tokio::task::spawn_blocking(move || -> Result<_, ModelError> {
            let current = checked(worker.predict(&input)?)?;
            let next = checked(worker.predict(&next_input)?)?;
            Ok((current, next))
        });

        let (current, next) = match tokio::time::timeout(self.timeout, inference).await {
            Err(_) => {
                warn!(sensor_id, timeout_ms = self.timeout.as_millis() as u64, "Inference timed out, threshold-only");
                return PredictionOutcome::Skipped(SkipReason::Timeout);
            }
            Ok(Err(join)) => {
                error!(sensor_id, error = %join, "Inference task panicked");
                return PredictionOutcome::Skipped(SkipReason::ModelFailure(join.to_string()));
            }
            Ok(Ok(Err(e))) => {
                warn!(sensor_id, error = %e, "Prediction skipped: model failure");
                return PredictionOutcome::Skipped(SkipReason::ModelFailure(e.to_string()));
            }
            Ok(Ok(Ok(outputs))) => outputs,
        };

        let (confidence, confidence_defect) = bounded_confidence(current.confidence);
        if let Some(raw) = confidence_defect {
            error!(
                sensor_id,
                model_version = model.version(),
                confidence = raw,
                "Model reported confidence outside [0, 1]; clamped"
            );
        }

        let anomaly = self.score_residual(features.value, current.value, model.residual_sigma());
        if let Some(ref a) = anomaly {
            debug!(sensor_id, residual = a.residual, normalized = a.normalized, "Anomalous residual");
        }

        PredictionOutcome::Predicted(ModelPrediction {
            predicted_value: current.value,
            confidence,
            model_version: model.version().to_string(),
            confidence_defect,
            anomaly,
            next_value: Some(next.value),
        })
    }

    fn score_residual(&self, actual: f64, predicted: f64, sigma: f64) -> Option<AnomalySignal> {
        if !sigma.is_finite() || sigma <= 0.0 {
            return None;
        }
        let residual = (actual - predicted).abs();
        let normalized = residual / sigma;
        let k = self.sigma_multiple;
        if normalized <= k {
            return None;
        }
        let severity = if normalized > 2.0 * k { Severity::High } else { Severity::Medium };
        Some(AnomalySignal { residual, sigma, normalized, severity })
    }

    /// Roll the model forward `steps` intervals from the latest readings
    /// (oldest first). Each prediction is fed back as the next lag1.
    pub fn forecast(
        &self,
        sensor_type: SensorType,
        history: &[Reading],
        steps: usize,
    ) -> Result<Vec<ForecastPoint>, ModelError> {
        let model = self.registry.get(sensor_type).ok_or(ModelError::Unbound(sensor_type))?;
        forecast_with(model.as_ref(), history, steps, self.step)
    }
}

/// Reject NaN/inf values before they reach storage.
fn checked(out: ModelOutput) -> Result<ModelOutput, ModelError> {
    if out.value.is_finite() {
        Ok(out)
    } else {
        Err(ModelError::NonFinite(format!("prediction {}", out.value)))
    }
}

/// Clamp into `[0, 1]`, returning the raw value when clamping was needed.
fn bounded_confidence(raw: f64) -> (f64, Option<f64>) {
    if (0.0..=1.0).contains(&raw) {
        (raw, None)
    } else if raw.is_nan() {
        (0.0, Some(raw))
    } else {
        (raw.clamp(0.0, 1.0), Some(raw))
    }
}

fn forecast_with(
    model: &dyn RegressionModel,
    history: &[Reading],
    steps: usize,
    step: ChronoDuration,
) -> Result<Vec<ForecastPoint>, ModelError> {
    let [.., a, b, c] = history else {
        return Err(ModelError::InsufficientHistory { needed: 3, have: history.len() });
    };
    let mut window = [a.value, b.value, c.value];
    let mut ts = c.ts;
    let mut points = Vec::with_capacity(steps);

    for n in 1..=steps {
        ts += step;
        let input = ModelInput {
            lag1: window[2],
            lag2: window[1],
            roll3: window.iter().sum::<f64>() / 3.0,
            hour: f64::from(ts.hour()),
        };
        let out = checked(model.predict(&input)?)?;
        points.push(ForecastPoint {
            step: n,
            ts,
            predicted_value: out.value,
            confidence: bounded_confidence(out.confidence).0,
        });
        window = [window[1], window[2], out.value];
    }

    Ok(points)
}
