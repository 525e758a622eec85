//! v1 API route table.

use axum::routing::{get, post};
use axum::Router;

use super::handlers::{self, ApiState};

/// Build the `/api/v1` router.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        // Sensors
        .route("/sensors", get(handlers::list_sensors))
        .route("/sensors/:id/latest", get(handlers::sensor_latest))
        .route("/sensors/:id/stats", get(handlers::sensor_stats))
        .route("/sensors/:id/predictions", get(handlers::sensor_predictions))
        .route("/sensors/:id/forecast", get(handlers::sensor_forecast))
        .route("/sensors/:id/accuracy", get(handlers::sensor_accuracy))
        .route("/summary", get(handlers::summary))
        // Alerts
        .route("/alerts", get(handlers::list_alerts))
        .route("/alerts/:id/acknowledge", post(handlers::acknowledge_alert))
        // Pipeline
        .route("/pipeline/status", get(handlers::pipeline_status))
        .route("/readings", post(handlers::ingest_reading))
        .with_state(state)
}
