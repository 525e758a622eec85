//! Sentinel Configuration - thresholds, model bindings and pipeline limits as TOML
//!
//! Every section implements `Default` with the documented values, so a partial
//! (or absent) `sentinel.toml` only overrides what it names.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;
use crate::model::LinearArtifact;
use crate::types::{SensorType, Severity};

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one sentinel deployment.
///
/// Load with `SentinelConfig::load()` which searches:
/// 1. `$SENTINEL_CONFIG` env var
/// 2. `./sentinel.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub alerts: AlertConfig,

    /// Per-sensor-type threshold rules
    #[serde(default)]
    pub thresholds: ThresholdTable,

    /// Per-sensor-type trained model bindings
    #[serde(default)]
    pub models: ModelBindings,

    /// Registry seed: assets and their sensors, upserted at startup
    #[serde(default = "default_assets")]
    pub assets: Vec<AssetSeed>,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
            pipeline: PipelineConfig::default(),
            alerts: AlertConfig::default(),
            thresholds: ThresholdTable::default(),
            models: ModelBindings::default(),
            assets: default_assets(),
        }
    }
}

impl SentinelConfig {
    /// Load configuration using the standard search order:
    /// 1. `$SENTINEL_CONFIG` environment variable
    /// 2. `./sentinel.toml` in the current working directory
    /// 3. Built-in defaults
    ///
    /// Only a missing file falls through to the next step. A file that exists
    /// but fails to parse or validate is an error.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("SENTINEL_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                let config = Self::load_from_file(&p)?;
                info!(path = %p.display(), "Loaded config from SENTINEL_CONFIG");
                return Ok(config);
            }
            warn!(path = %path, "SENTINEL_CONFIG points to non-existent file, falling back");
        }

        let local = PathBuf::from("sentinel.toml");
        if local.exists() {
            let config = Self::load_from_file(&local)?;
            info!("Loaded config from ./sentinel.toml");
            return Ok(config);
        }

        info!("No sentinel.toml found, using built-in defaults");
        Ok(Self::default())
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, err) => ConfigError::Parse(path.to_path_buf(), err),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    ///
    /// Unknown keys only warn; structural and range problems are errors.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate limits and tables for internal consistency.
    ///
    /// Collects every problem rather than stopping at the first one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        let p = &self.pipeline;
        if p.queue_depth == 0 {
            errors.push("pipeline.queue_depth must be > 0".to_string());
        }
        if p.inference_timeout_ms == 0 {
            errors.push("pipeline.inference_timeout_ms must be > 0".to_string());
        }
        if p.stall_threshold == 0 {
            errors.push("pipeline.stall_threshold must be > 0".to_string());
        }
        if p.forecast_step_secs <= 0 {
            errors.push("pipeline.forecast_step_secs must be > 0".to_string());
        }

        if self.storage.retry_attempts == 0 {
            errors.push("storage.retry_attempts must be >= 1".to_string());
        }

        let a = &self.alerts;
        if !a.anomaly_sigma_multiple.is_finite() || a.anomaly_sigma_multiple <= 0.0 {
            errors.push(format!(
                "alerts.anomaly_sigma_multiple must be a positive number, got {}",
                a.anomaly_sigma_multiple
            ));
        }

        for sensor_type in SensorType::ALL {
            for (i, rule) in self.thresholds.rules_for(sensor_type).iter().enumerate() {
                if !rule.value.is_finite() {
                    errors.push(format!(
                        "thresholds.{sensor_type}[{i}].value must be finite, got {}",
                        rule.value
                    ));
                }
            }

            if let Some(binding) = self.models.binding_for(sensor_type) {
                match (&binding.artifact, &binding.inline) {
                    (Some(_), Some(_)) => errors.push(format!(
                        "models.{sensor_type}: set either 'artifact' or 'inline', not both"
                    )),
                    (None, None) => errors.push(format!(
                        "models.{sensor_type}: one of 'artifact' or 'inline' is required"
                    )),
                    (None, Some(inline)) => {
                        if let Err(e) = inline.check() {
                            errors.push(format!("models.{sensor_type}.inline: {e}"));
                        }
                    }
                    (Some(_), None) => {}
                }
            }
        }

        let mut sensor_ids = HashSet::new();
        let mut asset_ids = HashSet::new();
        for asset in &self.assets {
            if asset.id.trim().is_empty() {
                errors.push("assets: asset id must not be empty".to_string());
            }
            if !asset_ids.insert(asset.id.as_str()) {
                errors.push(format!("assets: duplicate asset id '{}'", asset.id));
            }
            for sensor in &asset.sensors {
                if !sensor_ids.insert(sensor.id.as_str()) {
                    errors.push(format!("assets: duplicate sensor id '{}'", sensor.id));
                }
                if !sensor.min_value.is_finite()
                    || !sensor.max_value.is_finite()
                    || sensor.min_value >= sensor.max_value
                {
                    errors.push(format!(
                        "sensor '{}': min_value ({}) must be < max_value ({})",
                        sensor.id, sensor.min_value, sensor.max_value
                    ));
                }
            }
        }

        for w in super::validation::validate_threshold_reach(self) {
            warn!("{}", w);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Every seeded sensor's type must have threshold rules and a model binding.
    ///
    /// Startup-fatal: an unbound type is a configuration error, not a
    /// per-reading condition.
    pub fn check_bindings(&self) -> Result<(), ConfigError> {
        for asset in &self.assets {
            for sensor in &asset.sensors {
                if self.thresholds.rules_for(sensor.sensor_type).is_empty() {
                    return Err(ConfigError::MissingBinding {
                        sensor_id: sensor.id.clone(),
                        sensor_type: sensor.sensor_type,
                        what: "threshold rules",
                    });
                }
                if self.models.binding_for(sensor.sensor_type).is_none() {
                    return Err(ConfigError::MissingBinding {
                        sensor_id: sensor.id.clone(),
                        sensor_type: sensor.sensor_type,
                        what: "model binding",
                    });
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// sled database directory
    pub path: PathBuf,
    /// Write attempts before `PersistenceFailed`
    pub retry_attempts: u32,
    /// First backoff delay, doubled per retry
    pub retry_base_delay_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(defaults::DEFAULT_DB_PATH),
            retry_attempts: defaults::PERSISTENCE_RETRY_ATTEMPTS,
            retry_base_delay_ms: defaults::PERSISTENCE_RETRY_BASE_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: defaults::DEFAULT_SERVER_ADDR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bounded per-sensor queue depth
    pub queue_depth: usize,
    /// Model inference timeout (ms); on expiry the reading is threshold-only
    pub inference_timeout_ms: u64,
    /// Consecutive failures before a sensor is reported stalled
    pub stall_threshold: u32,
    /// Spacing of forecast steps (seconds)
    pub forecast_step_secs: i64,
}

impl PipelineConfig {
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_depth: defaults::SENSOR_QUEUE_DEPTH,
            inference_timeout_ms: defaults::INFERENCE_TIMEOUT_MS,
            stall_threshold: defaults::STALL_FAILURE_THRESHOLD,
            forecast_step_secs: defaults::FORECAST_STEP_SECS,
        }
    }
}

/// How repeated violations are folded into an already Open alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// One Open alert per (sensor, type) while unacknowledged; later
    /// violations refresh its actual value and message.
    #[default]
    UpdateOpen,
    /// One Open alert per (sensor, type) while unacknowledged; later
    /// violations are dropped and the first occurrence is kept verbatim.
    SuppressOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub dedup: DedupPolicy,
    /// Residual multiple of model σ that signals an anomaly
    pub anomaly_sigma_multiple: f64,
    /// Raise `prediction` alerts when the one-step forecast breaches a threshold
    pub forecast_alerts: bool,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            dedup: DedupPolicy::default(),
            anomaly_sigma_multiple: defaults::ANOMALY_SIGMA_MULTIPLE,
            forecast_alerts: true,
        }
    }
}

// ============================================================================
// Threshold Table
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Violation when value > threshold (strict)
    Above,
    /// Violation when value < threshold (strict)
    Below,
}

/// One `{direction, value, severity}` rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ThresholdRule {
    pub direction: Direction,
    pub value: f64,
    pub severity: Severity,
}

impl ThresholdRule {
    pub fn above(value: f64, severity: Severity) -> Self {
        Self { direction: Direction::Above, value, severity }
    }

    pub fn below(value: f64, severity: Severity) -> Self {
        Self { direction: Direction::Below, value, severity }
    }
}

/// `{sensor_type: [rule, ...]}` enumerated once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdTable {
    pub temperature: Vec<ThresholdRule>,
    pub humidity: Vec<ThresholdRule>,
    pub vibration: Vec<ThresholdRule>,
    pub luminosity: Vec<ThresholdRule>,
}

impl ThresholdTable {
    pub fn rules_for(&self, sensor_type: SensorType) -> &[ThresholdRule] {
        match sensor_type {
            SensorType::Temperature => &self.temperature,
            SensorType::Humidity => &self.humidity,
            SensorType::Vibration => &self.vibration,
            SensorType::Luminosity => &self.luminosity,
        }
    }

    pub fn rules_for_mut(&mut self, sensor_type: SensorType) -> &mut Vec<ThresholdRule> {
        match sensor_type {
            SensorType::Temperature => &mut self.temperature,
            SensorType::Humidity => &mut self.humidity,
            SensorType::Vibration => &mut self.vibration,
            SensorType::Luminosity => &mut self.luminosity,
        }
    }
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            temperature: vec![ThresholdRule::above(35.0, Severity::Critical)],
            humidity: vec![ThresholdRule::above(80.0, Severity::Medium)],
            vibration: vec![ThresholdRule::above(2000.0, Severity::Critical)],
            luminosity: vec![ThresholdRule::below(10.0, Severity::Low)],
        }
    }
}

// ============================================================================
// Model Bindings
// ============================================================================

/// Where a sensor type's trained model comes from.
///
/// Exactly one of `artifact` (JSON file on disk) or `inline` must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelBinding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<LinearArtifact>,
}

impl ModelBinding {
    pub fn inline(artifact: LinearArtifact) -> Self {
        Self { artifact: None, inline: Some(artifact) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelBindings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<ModelBinding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<ModelBinding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vibration: Option<ModelBinding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub luminosity: Option<ModelBinding>,
}

impl ModelBindings {
    pub fn binding_for(&self, sensor_type: SensorType) -> Option<&ModelBinding> {
        match sensor_type {
            SensorType::Temperature => self.temperature.as_ref(),
            SensorType::Humidity => self.humidity.as_ref(),
            SensorType::Vibration => self.vibration.as_ref(),
            SensorType::Luminosity => self.luminosity.as_ref(),
        }
    }
}

impl Default for ModelBindings {
    /// Baseline smoothing models: predict the rolling mean, with a residual
    /// scale sized to each sensor family's normal jitter.
    fn default() -> Self {
        let baseline = |sigma: f64| Some(ModelBinding::inline(LinearArtifact::rolling_mean("v0-baseline", sigma)));
        Self {
            temperature: baseline(1.5),
            humidity: baseline(4.0),
            vibration: baseline(150.0),
            luminosity: baseline(8.0),
        }
    }
}

// ============================================================================
// Registry Seed
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSeed {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub sensors: Vec<SensorSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorSeed {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    pub unit: String,
    pub min_value: f64,
    pub max_value: f64,
}

fn default_assets() -> Vec<AssetSeed> {
    let sensor = |id: &str, sensor_type, unit: &str, min_value, max_value| SensorSeed {
        id: id.to_string(),
        name: None,
        sensor_type,
        unit: unit.to_string(),
        min_value,
        max_value,
    };
    vec![AssetSeed {
        id: "LINE_MAIN".to_string(),
        name: "Main Production Line".to_string(),
        location: "Sector A - Plant".to_string(),
        sensors: vec![
            sensor("S_TEMP", SensorType::Temperature, "°C", -40.0, 80.0),
            sensor("S_HUMIDITY", SensorType::Humidity, "%", 0.0, 100.0),
            sensor("S_LIGHT", SensorType::Luminosity, "%", 0.0, 100.0),
            sensor("S_VIBRATION", SensorType::Vibration, "mg", 0.0, 5000.0),
        ],
    }]
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error ({0}): {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("config parse error ({0}): {1}")]
    Parse(PathBuf, #[source] toml::de::Error),
    #[error("config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
    #[error("sensor '{sensor_id}' has type '{sensor_type}' with no {what} configured")]
    MissingBinding {
        sensor_id: String,
        sensor_type: SensorType,
        what: &'static str,
    },
    #[error("model artifact for '{sensor_type}' could not be loaded: {reason}")]
    ModelArtifact {
        sensor_type: SensorType,
        reason: String,
    },
}

// ============================================================================
// Tests
// ============================================================================
