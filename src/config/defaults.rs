//! System-wide default constants.
//!
//! Every value here is also the `Default` of the matching config field, so a
//! missing `sentinel.toml` behaves exactly as documented.

// ============================================================================
// Feature Builder
// ============================================================================

/// Per-sensor history window (values) used for lag and rolling features.
pub const FEATURE_WINDOW_SIZE: usize = 3;

// ============================================================================
// Pipeline
// ============================================================================

/// Bounded per-sensor queue depth before `Backpressure` is returned.
pub const SENSOR_QUEUE_DEPTH: usize = 64;

/// Upper bound on a single model inference call (ms).
pub const INFERENCE_TIMEOUT_MS: u64 = 250;

/// Consecutive persistence failures after which a sensor is reported stalled.
pub const STALL_FAILURE_THRESHOLD: u32 = 3;

/// Spacing between forecast steps (seconds). 300 = 5 minutes.
pub const FORECAST_STEP_SECS: i64 = 300;

/// Maximum number of steps a single forecast request may roll forward.
pub const FORECAST_MAX_STEPS: usize = 48;

// ============================================================================
// Alerts
// ============================================================================

/// Residual multiple of the model σ above which an anomaly is signalled.
pub const ANOMALY_SIGMA_MULTIPLE: f64 = 2.0;

// ============================================================================
// Storage
// ============================================================================

/// Default sled database path.
pub const DEFAULT_DB_PATH: &str = "./data/sentinel.db";

/// Write attempts before `PersistenceFailed` is surfaced.
pub const PERSISTENCE_RETRY_ATTEMPTS: u32 = 3;

/// First backoff delay (ms); doubled after each failed attempt.
pub const PERSISTENCE_RETRY_BASE_MS: u64 = 50;

// ============================================================================
// Reports
// ============================================================================

/// Tolerance when pairing a prediction with the nearest actual reading (seconds).
pub const ACCURACY_MATCH_TOLERANCE_SECS: i64 = 1_800;

/// Default look-back window for prediction accuracy reports (hours).
pub const ACCURACY_DEFAULT_HOURS: i64 = 24;

// ============================================================================
// Server
// ============================================================================

/// Default bind address for the read API.
pub const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:8080";
