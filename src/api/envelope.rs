//! JSON envelope and error type shared by the API handlers.
//!
//! ```text
//! 2xx / ingestion outcomes   { "data": ..., "meta": { "version", "timestamp" } }
//! request/lookup failures    { "error": { "code", "message" }, "meta": { ... } }
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::alerts::AlertError;
use crate::model::ModelError;
use crate::storage::StorageError;

pub const API_VERSION: &str = "1";

#[derive(Debug, Serialize)]
pub struct Meta {
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
}

impl Meta {
    fn now() -> Self {
        Self { version: API_VERSION, timestamp: Utc::now() }
    }
}

#[derive(Debug, Serialize)]
struct DataBody<T> {
    data: T,
    meta: Meta,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
    meta: Meta,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// 200 with `data`.
pub fn ok<T: Serialize>(data: T) -> Response {
    respond(StatusCode::OK, data)
}

/// `data` under an explicit status, used where the payload itself explains a
/// non-200 outcome (ingestion results).
pub fn respond<T: Serialize>(status: StatusCode, data: T) -> Response {
    (status, Json(DataBody { data, meta: Meta::now() })).into_response()
}

pub type ApiResult = Result<Response, ApiError>;

/// Every failure a handler can return. The variant picks the status code,
/// the message becomes `error.message`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    /// Well-formed request the data cannot satisfy (e.g. too little history).
    #[error("{message}")]
    Unprocessable { code: &'static str, message: String },
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unprocessable { code, .. } => *code,
            ApiError::Unavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail { code: self.code(), message: self.to_string() },
            meta: Meta::now(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        warn!(error = %e, "API storage query failed");
        match e {
            StorageError::Unavailable(msg) => ApiError::Unavailable(msg),
            StorageError::NotFound(msg) => ApiError::NotFound(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<AlertError> for ApiError {
    fn from(e: AlertError) -> Self {
        match e {
            AlertError::NotFound(id) => ApiError::NotFound(format!("alert {id} not found")),
            AlertError::Storage(e) => e.into(),
        }
    }
}

impl From<ModelError> for ApiError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::InsufficientHistory { .. } => ApiError::Unprocessable {
                code: "INSUFFICIENT_HISTORY",
                message: e.to_string(),
            },
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn data_envelope_carries_meta() {
        let resp = ok(serde_json::json!({"sensors": 4}));
        assert_eq!(resp.status(), StatusCode::OK);
        let v = json(resp).await;
        assert_eq!(v["data"]["sensors"], 4);
        assert_eq!(v["meta"]["version"], API_VERSION);
        assert!(v["meta"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn respond_keeps_envelope_under_other_status() {
        let resp = respond(StatusCode::TOO_MANY_REQUESTS, serde_json::json!({"status": "backpressure"}));
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(json(resp).await["data"]["status"], "backpressure");
    }

    #[tokio::test]
    async fn storage_unavailable_maps_to_503() {
        let err: ApiError = StorageError::Unavailable("sled flush failed".into()).into();
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let v = json(resp).await;
        assert_eq!(v["error"]["code"], "SERVICE_UNAVAILABLE");
        assert_eq!(v["error"]["message"], "sled flush failed");
    }

    #[test]
    fn insufficient_history_is_unprocessable() {
        let err: ApiError = ModelError::InsufficientHistory { needed: 3, have: 1 }.into();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code(), "INSUFFICIENT_HISTORY");
    }

    #[test]
    fn missing_alert_is_not_found() {
        let err: ApiError = AlertError::NotFound(42).into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "alert 42 not found");
    }
}
