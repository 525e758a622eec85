//! API handlers: read views over the store plus HTTP ingestion.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::envelope::{self, ApiError, ApiResult};
use crate::alerts::AcknowledgeOutcome;
use crate::config::defaults::{ACCURACY_DEFAULT_HOURS, FEATURE_WINDOW_SIZE, FORECAST_MAX_STEPS};
use crate::model::{prediction_accuracy, window_start};
use crate::pipeline::{Orchestrator, ProcessingResult};
use crate::storage::{self, SensorStats, TelemetryStore};
use crate::types::{Alert, RawReading, Reading, Sensor};

const DEFAULT_PREDICTIONS_LIMIT: usize = 100;
const DEFAULT_FORECAST_STEPS: usize = 6;

/// Shared state for every route.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

impl ApiState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    fn store(&self) -> &dyn TelemetryStore {
        self.orchestrator.store().as_ref()
    }

    fn sensor(&self, id: &str) -> Result<Sensor, ApiError> {
        self.store()
            .get_sensor(id)?
            .ok_or_else(|| ApiError::NotFound(format!("sensor '{id}' not registered")))
    }
}

/// Validates `hours` and returns the start of the look-back window.
fn window_since(hours: i64) -> Result<DateTime<Utc>, ApiError> {
    if hours <= 0 {
        return Err(ApiError::BadRequest("hours must be positive".into()));
    }
    window_start(Utc::now(), hours)
        .ok_or_else(|| ApiError::BadRequest(format!("hours={hours} reaches past the supported time range")))
}

#[derive(Debug, Serialize)]
pub struct LatestReading {
    pub sensor: Sensor,
    pub reading: Option<Reading>,
}

#[derive(Debug, Serialize)]
pub struct StatsView {
    pub sensor_id: String,
    pub stats: Option<SensorStats>,
}

#[derive(Debug, Serialize)]
pub struct AcknowledgeView {
    pub alert: Alert,
    pub already_acknowledged: bool,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PredictionsQuery {
    pub limit: Option<usize>,
    /// Only predictions from the last N hours
    pub hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ForecastQuery {
    pub steps: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AccuracyQuery {
    pub hours: Option<i64>,
}

// ============================================================================
// Sensors
// ============================================================================

/// GET /api/v1/sensors
pub async fn list_sensors(State(state): State<ApiState>) -> ApiResult {
    Ok(envelope::ok(state.store().list_sensors()?))
}

/// GET /api/v1/summary
pub async fn summary(State(state): State<ApiState>) -> ApiResult {
    Ok(envelope::ok(storage::sensor_summary(state.store())?))
}

/// GET /api/v1/sensors/:id/latest
pub async fn sensor_latest(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    let sensor = state.sensor(&id)?;
    let reading = state.store().latest_reading(&id)?;
    Ok(envelope::ok(LatestReading { sensor, reading }))
}

/// GET /api/v1/sensors/:id/stats
pub async fn sensor_stats(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    state.sensor(&id)?;
    let stats = state.store().sensor_stats(&id)?;
    Ok(envelope::ok(StatsView { sensor_id: id, stats }))
}

/// GET /api/v1/sensors/:id/predictions?limit=N&hours=H
pub async fn sensor_predictions(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(q): Query<PredictionsQuery>,
) -> ApiResult {
    state.sensor(&id)?;
    let since = match q.hours {
        Some(h) => Some(window_since(h)?),
        None => None,
    };
    let limit = q.limit.unwrap_or(DEFAULT_PREDICTIONS_LIMIT);
    Ok(envelope::ok(state.store().predictions_for_sensor(&id, since, Some(limit))?))
}

/// GET /api/v1/sensors/:id/forecast?steps=N
pub async fn sensor_forecast(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(q): Query<ForecastQuery>,
) -> ApiResult {
    let sensor = state.sensor(&id)?;
    let steps = q.steps.unwrap_or(DEFAULT_FORECAST_STEPS);
    if steps == 0 || steps > FORECAST_MAX_STEPS {
        return Err(ApiError::BadRequest(format!("steps must be between 1 and {FORECAST_MAX_STEPS}")));
    }

    // store returns newest first, the model wants oldest first
    let mut history = state.store().recent_readings(&id, FEATURE_WINDOW_SIZE)?;
    history.reverse();

    let points = state.orchestrator.adapter().forecast(sensor.sensor_type, &history, steps)?;
    Ok(envelope::ok(points))
}

/// GET /api/v1/sensors/:id/accuracy?hours=N
pub async fn sensor_accuracy(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(q): Query<AccuracyQuery>,
) -> ApiResult {
    state.sensor(&id)?;
    let hours = q.hours.unwrap_or(ACCURACY_DEFAULT_HOURS);
    window_since(hours)?;
    Ok(envelope::ok(prediction_accuracy(state.store(), &id, hours, Utc::now())?))
}

// ============================================================================
// Alerts
// ============================================================================

/// GET /api/v1/alerts?limit=N (unacknowledged, newest first)
pub async fn list_alerts(State(state): State<ApiState>, Query(q): Query<LimitQuery>) -> ApiResult {
    Ok(envelope::ok(state.orchestrator.alerts().open_alerts(q.limit)?))
}

/// POST /api/v1/alerts/:id/acknowledge
pub async fn acknowledge_alert(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    let id: u64 = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid alert id '{id}'")))?;
    let view = match state.orchestrator.alerts().acknowledge(id).await? {
        AcknowledgeOutcome::Acknowledged(alert) => AcknowledgeView { alert, already_acknowledged: false },
        AcknowledgeOutcome::AlreadyAcknowledged(alert) => AcknowledgeView { alert, already_acknowledged: true },
    };
    Ok(envelope::ok(view))
}

// ============================================================================
// Pipeline
// ============================================================================

/// GET /api/v1/pipeline/status
pub async fn pipeline_status(State(state): State<ApiState>) -> ApiResult {
    Ok(envelope::ok(state.orchestrator.status()))
}

/// POST /api/v1/readings
///
/// Body is one ingestion record. The envelope carries the `ProcessingResult`;
/// the status code tells the caller whether to retry.
pub async fn ingest_reading(
    State(state): State<ApiState>,
    body: Result<Json<RawReading>, JsonRejection>,
) -> ApiResult {
    let Json(raw) = body.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let result = state.orchestrator.process(raw).await;
    let status = match &result {
        ProcessingResult::Processed(_) => StatusCode::OK,
        ProcessingResult::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ProcessingResult::Backpressure { .. } => StatusCode::TOO_MANY_REQUESTS,
        ProcessingResult::PersistenceFailed { .. } | ProcessingResult::ShuttingDown => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    Ok(envelope::respond(status, result))
}
