//! Linear regression artifacts.
//!
//! A trained model is a JSON document produced offline:
//!
//! ```json
//! {
//!   "version": "v1.0",
//!   "intercept": 0.42,
//!   "coefficients": { "lag1": 0.61, "lag2": 0.12, "roll3": 0.25, "hour": 0.01 },
//!   "residual_sigma": 1.3
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{ModelError, ModelInput, ModelOutput, RegressionModel};

fn default_confidence_floor() -> f64 {
    0.1
}

fn default_confidence_ceiling() -> f64 {
    0.95
}

/// Weights for `[lag1, lag2, roll3, hour]`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Coefficients {
    pub lag1: f64,
    pub lag2: f64,
    pub roll3: f64,
    pub hour: f64,
}

/// Serialized linear model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinearArtifact {
    pub version: String,
    #[serde(default)]
    pub intercept: f64,
    #[serde(default)]
    pub coefficients: Coefficients,
    /// Residual standard deviation observed on the training set (σ).
    pub residual_sigma: f64,
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
    #[serde(default = "default_confidence_ceiling")]
    pub confidence_ceiling: f64,
}

impl LinearArtifact {
    /// Baseline that predicts the 3-sample rolling mean.
    pub fn rolling_mean(version: &str, residual_sigma: f64) -> Self {
        Self {
            version: version.to_string(),
            intercept: 0.0,
            coefficients: Coefficients { roll3: 1.0, ..Default::default() },
            residual_sigma,
            confidence_floor: default_confidence_floor(),
            confidence_ceiling: default_confidence_ceiling(),
        }
    }

    /// Read an artifact from disk and check it.
    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
        let artifact: Self =
            serde_json::from_str(&raw).map_err(|e| format!("{}: {e}", path.display()))?;
        artifact.check()?;
        Ok(artifact)
    }

    /// Structural sanity of the weights and confidence bounds.
    pub fn check(&self) -> Result<(), String> {
        if self.version.trim().is_empty() {
            return Err("version must not be empty".into());
        }
        let c = &self.coefficients;
        let weights = [self.intercept, c.lag1, c.lag2, c.roll3, c.hour];
        if weights.iter().any(|w| !w.is_finite()) {
            return Err("intercept and coefficients must be finite".into());
        }
        if !self.residual_sigma.is_finite() || self.residual_sigma <= 0.0 {
            return Err(format!("residual_sigma must be > 0, got {}", self.residual_sigma));
        }
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.confidence_floor)
            || !in_unit(self.confidence_ceiling)
            || self.confidence_floor > self.confidence_ceiling
        {
            return Err(format!(
                "confidence bounds must satisfy 0 <= floor ({}) <= ceiling ({}) <= 1",
                self.confidence_floor, self.confidence_ceiling
            ));
        }
        Ok(())
    }
}

/// Immutable, shareable model built from an artifact.
#[derive(Debug, Clone)]
pub struct LinearModel {
    artifact: LinearArtifact,
}

impl LinearModel {
    pub fn new(artifact: LinearArtifact) -> Self {
        Self { artifact }
    }

    pub fn artifact(&self) -> &LinearArtifact {
        &self.artifact
    }
}

impl RegressionModel for LinearModel {
    fn version(&self) -> &str {
        &self.artifact.version
    }

    fn residual_sigma(&self) -> f64 {
        self.artifact.residual_sigma
    }

    fn predict(&self, input: &ModelInput) -> Result<ModelOutput, ModelError> {
        let a = &self.artifact;
        let c = &a.coefficients;
        let value = a.intercept
            + c.lag1 * input.lag1
            + c.lag2 * input.lag2
            + c.roll3 * input.roll3
            + c.hour * input.hour;
        if !value.is_finite() {
            return Err(ModelError::NonFinite(format!("prediction {value}")));
        }

        // relative residual spread; near zero the ratio is meaningless
        let confidence = if value.abs() < f64::EPSILON {
            a.confidence_floor
        } else {
            (1.0 - a.residual_sigma / value.abs()).clamp(a.confidence_floor, a.confidence_ceiling)
        };

        Ok(ModelOutput { value, confidence })
    }
}
