//! REST API module using Axum
//!
//! Read-only views for the monitoring dashboard plus HTTP ingestion:
//! - `/api/v1/sensors/...` latest reading, aggregates, predictions, forecast, accuracy
//! - `/api/v1/alerts` open alerts and acknowledgement
//! - `/api/v1/pipeline/status` per-sensor worker health (stalled sensors)
//! - `POST /api/v1/readings` ingestion returning the processing result

pub mod envelope;
pub mod handlers;
mod routes;

pub use handlers::ApiState;

use axum::http::{header, Method};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Ingestion records are tiny; oversized bodies never reach a handler.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Build a CORS layer that is restrictive by default (same-origin only).
///
/// Set `SENTINEL_CORS_ORIGINS` to a comma-separated list of allowed origins
/// for a dashboard served from elsewhere.
fn build_cors_layer() -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);
    match std::env::var("SENTINEL_CORS_ORIGINS") {
        Ok(origins) => {
            let allowed: Vec<_> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            tracing::info!(origins = %origins, "CORS: allowing configured origins");
            base.allow_origin(allowed)
        }
        Err(_) => base,
    }
}

/// Create the application router.
pub fn create_app(state: ApiState) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes(state))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
}
