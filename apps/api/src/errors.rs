use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::circuit_breaker::Rejected;
use crate::store::StoreError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The persistence layer cannot be reached; the only error allowed to
    /// fail a routing request.
    #[error("State unavailable: {0}")]
    StateUnavailable(String),

    /// The target service's circuit is open; no call was made.
    #[error(transparent)]
    DownstreamUnhealthy(#[from] Rejected),

    #[error("Downstream error: {0}")]
    Downstream(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::StateUnavailable(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut retry_after = None;
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::StateUnavailable(msg) => {
                tracing::error!("State store unavailable: {msg}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STATE_UNAVAILABLE",
                    "User state is temporarily unavailable".to_string(),
                )
            }
            AppError::DownstreamUnhealthy(rejected) => {
                tracing::warn!("Rejected call to {}: circuit {:?}", rejected.service, rejected.state);
                retry_after = rejected.retry_after.map(|d| d.as_secs().max(1));
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    format!("Service '{}' is currently unavailable", rejected.service),
                )
            }
            AppError::Downstream(msg) => {
                tracing::error!("Downstream error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "DOWNSTREAM_ERROR",
                    "A downstream service returned an error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::circuit_breaker::CircuitState;
    use std::time::Duration;

    #[test]
    fn test_store_errors_map_to_state_unavailable() {
        let err: AppError = StoreError::Unavailable("connection refused".to_string()).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_open_circuit_sets_retry_after() {
        let err = AppError::DownstreamUnhealthy(Rejected {
            service: "scalability_lab".to_string(),
            state: CircuitState::Open,
            retry_after: Some(Duration::from_secs(12)),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "12");
    }

    #[test]
    fn test_validation_is_bad_request() {
        let response = AppError::Validation("bad".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
